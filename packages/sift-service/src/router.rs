use tokio::{sync::mpsc, task::JoinHandle};

use sift_domain::{ReplyEnvelope, Stage};

use crate::{
	orchestrator::{EventOutcome, Orchestrator},
	saga::IgnoreReason,
};

/// Consumes the reply channels and hands every reply to the saga it belongs to.
#[derive(Clone)]
pub struct ResultRouter {
	orchestrator: Orchestrator,
}
impl ResultRouter {
	pub fn new(orchestrator: Orchestrator) -> Self {
		Self { orchestrator }
	}

	/// Routes one reply that arrived on `channel`. Replies carrying another stage's payload are
	/// dropped.
	pub async fn deliver(&self, channel: Stage, envelope: ReplyEnvelope) -> EventOutcome {
		let received = envelope.stage();

		if received != channel {
			tracing::warn!(
				correlation_id = %envelope.correlation_id,
				channel = channel.reply_channel(),
				received = %received,
				"Reply arrived on the wrong channel."
			);

			return EventOutcome::Ignored(IgnoreReason::WrongChannel { channel, received });
		}

		self.orchestrator.on_stage_reply(envelope).await
	}

	/// Starts one listener per reply channel. Each reply is processed on its own task so a slow
	/// saga never holds up the channel.
	pub fn spawn(
		&self,
		receivers: Vec<(Stage, mpsc::Receiver<ReplyEnvelope>)>,
	) -> Vec<JoinHandle<()>> {
		receivers
			.into_iter()
			.map(|(stage, mut rx)| {
				let router = self.clone();

				tokio::spawn(async move {
					while let Some(envelope) = rx.recv().await {
						let router = router.clone();

						tokio::spawn(async move {
							router.deliver(stage, envelope).await;
						});
					}

					tracing::debug!(channel = stage.reply_channel(), "Reply channel closed.");
				})
			})
			.collect()
	}
}
