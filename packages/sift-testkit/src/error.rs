pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("{0}")]
	Message(String),

	#[error(transparent)]
	Bus(#[from] sift_bus::Error),

	#[error(transparent)]
	Config(#[from] sift_config::Error),
}
