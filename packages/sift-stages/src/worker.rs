use std::sync::Arc;

use tokio::{
	sync::{Semaphore, mpsc},
	task::JoinHandle,
};

use sift_bus::ReplyPublisher;
use sift_domain::{BoxFuture, ReplyEnvelope, RequestEnvelope, StageKind, StageReply};

use crate::Result;

/// Serves one stage. `handle` receives the typed request and returns the typed reply.
pub trait StageHandler
where
	Self: Send + Sync + 'static,
{
	type Kind: StageKind;

	fn handle<'a>(
		&'a self,
		request: <Self::Kind as StageKind>::Request,
	) -> BoxFuture<'a, Result<<Self::Kind as StageKind>::Reply>>;
}

/// Consumes `requests` until the channel closes, running at most `concurrency` handlers at once.
///
/// Every request yields exactly one reply. Handler errors become [`StageReply::Failed`].
pub async fn run_stage_worker<H>(
	handler: Arc<H>,
	mut requests: mpsc::Receiver<RequestEnvelope>,
	replies: Arc<dyn ReplyPublisher>,
	concurrency: usize,
) where
	H: StageHandler,
{
	let stage = H::Kind::STAGE;
	let permits = Arc::new(Semaphore::new(concurrency.max(1)));

	tracing::info!(stage = %stage, concurrency, "Stage worker started.");

	while let Some(envelope) = requests.recv().await {
		let Ok(permit) = permits.clone().acquire_owned().await else {
			break;
		};
		let handler = handler.clone();
		let replies = replies.clone();

		tokio::spawn(async move {
			let _permit = permit;
			let correlation_id = envelope.correlation_id;
			let reply = match H::Kind::unwrap_request(envelope.request) {
				Some(request) => match handler.handle(request).await {
					Ok(reply) => H::Kind::wrap_reply(reply),
					Err(err) => {
						tracing::warn!(
							correlation_id = %correlation_id,
							stage = %stage,
							error = %err,
							"Stage handler failed."
						);

						StageReply::Failed { stage, message: err.to_string() }
					},
				},
				None => StageReply::Failed {
					stage,
					message: "Request payload does not belong to this stage.".to_string(),
				},
			};

			if let Err(err) = replies.publish_reply(ReplyEnvelope { correlation_id, reply }).await
			{
				tracing::error!(
					correlation_id = %correlation_id,
					stage = %stage,
					error = %err,
					"Failed to publish stage reply."
				);
			}
		});
	}

	tracing::info!(stage = %stage, "Stage worker stopped.");
}

pub fn spawn_stage_worker<H>(
	handler: Arc<H>,
	requests: mpsc::Receiver<RequestEnvelope>,
	replies: Arc<dyn ReplyPublisher>,
	concurrency: usize,
) -> JoinHandle<()>
where
	H: StageHandler,
{
	tokio::spawn(run_stage_worker(handler, requests, replies, concurrency))
}
