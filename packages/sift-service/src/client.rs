use std::{marker::PhantomData, sync::Arc, time::Duration};

use sift_bus::RequestPublisher;
use sift_domain::{CorrelationId, RequestEnvelope, StageKind};

/// Typed request side of one stage. The deadline bounds how long a publish may wait for
/// channel capacity.
pub struct StageClient<K> {
	publisher: Arc<dyn RequestPublisher>,
	deadline: Duration,
	_kind: PhantomData<fn() -> K>,
}
impl<K> StageClient<K>
where
	K: StageKind,
{
	pub fn new(publisher: Arc<dyn RequestPublisher>, deadline: Duration) -> Self {
		Self { publisher, deadline, _kind: PhantomData }
	}

	pub async fn send(
		&self,
		correlation_id: CorrelationId,
		request: K::Request,
	) -> sift_bus::Result<()> {
		let envelope = RequestEnvelope { correlation_id, request: K::wrap_request(request) };

		self.publisher.publish_request(envelope, self.deadline).await
	}
}
impl<K> Clone for StageClient<K> {
	fn clone(&self) -> Self {
		Self { publisher: self.publisher.clone(), deadline: self.deadline, _kind: PhantomData }
	}
}
