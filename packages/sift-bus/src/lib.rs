//! Message bus connecting the coordinator with the stage workers.
//!
//! Every stage owns one request channel and one reply channel. Publishers only ever see the
//! sending halves; the receiving halves are handed out once through [`BusReceivers`].

mod error;

pub use error::{Error, Result};

use std::{collections::HashMap, time::Duration};

use tokio::sync::mpsc::{self, error::SendTimeoutError};

use sift_domain::{BoxFuture, ReplyEnvelope, RequestEnvelope, Stage};

pub trait RequestPublisher
where
	Self: Send + Sync,
{
	/// Publishes a stage request, waiting at most `deadline` for channel capacity.
	fn publish_request<'a>(
		&'a self,
		envelope: RequestEnvelope,
		deadline: Duration,
	) -> BoxFuture<'a, Result<()>>;
}

pub trait ReplyPublisher
where
	Self: Send + Sync,
{
	fn publish_reply<'a>(&'a self, envelope: ReplyEnvelope) -> BoxFuture<'a, Result<()>>;
}

#[derive(Clone)]
pub struct InMemoryBus {
	requests: HashMap<Stage, mpsc::Sender<RequestEnvelope>>,
	replies: HashMap<Stage, mpsc::Sender<ReplyEnvelope>>,
}

pub struct BusReceivers {
	requests: HashMap<Stage, mpsc::Receiver<RequestEnvelope>>,
	replies: HashMap<Stage, mpsc::Receiver<ReplyEnvelope>>,
}

impl InMemoryBus {
	pub fn new(capacity: usize) -> (Self, BusReceivers) {
		let capacity = capacity.max(1);
		let mut requests = HashMap::new();
		let mut request_rx = HashMap::new();
		let mut replies = HashMap::new();
		let mut reply_rx = HashMap::new();

		for stage in Stage::ALL {
			let (tx, rx) = mpsc::channel(capacity);

			requests.insert(stage, tx);
			request_rx.insert(stage, rx);

			let (tx, rx) = mpsc::channel(capacity);

			replies.insert(stage, tx);
			reply_rx.insert(stage, rx);
		}

		(Self { requests, replies }, BusReceivers { requests: request_rx, replies: reply_rx })
	}

	async fn send_request(&self, envelope: RequestEnvelope, deadline: Duration) -> Result<()> {
		let stage = envelope.request.stage();
		let channel = stage.request_channel();
		let sender =
			self.requests.get(&stage).ok_or(Error::MissingChannel { channel })?;

		match sender.send_timeout(envelope, deadline).await {
			Ok(()) => Ok(()),
			Err(SendTimeoutError::Timeout(_)) => Err(Error::PublishTimeout { channel }),
			Err(SendTimeoutError::Closed(_)) => Err(Error::ChannelClosed { channel }),
		}
	}

	async fn send_reply(&self, envelope: ReplyEnvelope) -> Result<()> {
		let stage = envelope.stage();
		let channel = stage.reply_channel();
		let sender = self.replies.get(&stage).ok_or(Error::MissingChannel { channel })?;

		sender.send(envelope).await.map_err(|_| Error::ChannelClosed { channel })
	}
}

impl RequestPublisher for InMemoryBus {
	fn publish_request<'a>(
		&'a self,
		envelope: RequestEnvelope,
		deadline: Duration,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.send_request(envelope, deadline))
	}
}

impl ReplyPublisher for InMemoryBus {
	fn publish_reply<'a>(&'a self, envelope: ReplyEnvelope) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.send_reply(envelope))
	}
}

impl BusReceivers {
	pub fn take_requests(&mut self, stage: Stage) -> Result<mpsc::Receiver<RequestEnvelope>> {
		self.requests
			.remove(&stage)
			.ok_or(Error::MissingChannel { channel: stage.request_channel() })
	}

	pub fn take_replies(&mut self, stage: Stage) -> Result<mpsc::Receiver<ReplyEnvelope>> {
		self.replies.remove(&stage).ok_or(Error::MissingChannel { channel: stage.reply_channel() })
	}

	/// Drains every reply receiver that has not been taken yet, in stage order.
	pub fn take_all_replies(&mut self) -> Vec<(Stage, mpsc::Receiver<ReplyEnvelope>)> {
		let mut out = Vec::new();

		for stage in Stage::ALL {
			if let Some(rx) = self.replies.remove(&stage) {
				out.push((stage, rx));
			}
		}

		out
	}
}
