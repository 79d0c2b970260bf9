use std::{
	future::Future,
	pin::Pin,
	task::{Context, Poll},
};

use tokio::sync::oneshot;

use sift_domain::CorrelationId;

use crate::{
	error::{Error, Result},
	orchestrator::Orchestrator,
	search::SearchResponse,
};

/// Caller side of an in-flight search. Await it for the final response.
///
/// Dropping an unresolved handle cancels the search.
pub struct SearchHandle {
	correlation_id: CorrelationId,
	receiver: oneshot::Receiver<Result<SearchResponse>>,
	orchestrator: Orchestrator,
	settled: bool,
}
impl SearchHandle {
	pub(crate) fn new(
		correlation_id: CorrelationId,
		receiver: oneshot::Receiver<Result<SearchResponse>>,
		orchestrator: Orchestrator,
	) -> Self {
		Self { correlation_id, receiver, orchestrator, settled: false }
	}

	pub fn correlation_id(&self) -> CorrelationId {
		self.correlation_id
	}

	/// Removes the saga from the store. Returns whether it was still in flight.
	pub fn cancel(mut self) -> bool {
		self.settled = true;

		self.orchestrator.cancel(&self.correlation_id)
	}
}
impl Future for SearchHandle {
	type Output = Result<SearchResponse>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let correlation_id = self.correlation_id;

		match Pin::new(&mut self.receiver).poll(cx) {
			Poll::Pending => Poll::Pending,
			Poll::Ready(result) => {
				self.settled = true;

				Poll::Ready(result.unwrap_or(Err(Error::Abandoned { correlation_id })))
			},
		}
	}
}
impl Drop for SearchHandle {
	fn drop(&mut self) {
		if self.settled {
			return;
		}

		self.orchestrator.cancel(&self.correlation_id);
	}
}
