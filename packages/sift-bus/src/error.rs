pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Channel {channel} is closed.")]
	ChannelClosed { channel: &'static str },
	#[error("Timed out publishing to channel {channel}.")]
	PublishTimeout { channel: &'static str },
	#[error("Channel {channel} is not registered on this bus.")]
	MissingChannel { channel: &'static str },
}
