use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{sync::oneshot, task::AbortHandle};

use sift_domain::CorrelationId;

use crate::{
	error::{Error, Result},
	saga::{SagaPhase, SagaState},
	search::SearchResponse,
};

pub(crate) type Completion = oneshot::Sender<Result<SearchResponse>>;

/// One in-flight search: its state, the timer for the stage it is waiting on, and the channel
/// the caller is waiting on.
pub struct SagaEntry {
	pub state: SagaState,
	timer: Option<AbortHandle>,
	completion: Option<Completion>,
}
impl SagaEntry {
	pub(crate) fn new(state: SagaState, completion: Completion) -> Self {
		Self { state, timer: None, completion: Some(completion) }
	}

	/// Replaces the pending stage timer. The previous one is cancelled.
	pub(crate) fn arm(&mut self, timer: AbortHandle) {
		self.disarm();

		self.timer = Some(timer);
	}

	pub(crate) fn disarm(&mut self) {
		if let Some(timer) = self.timer.take() {
			timer.abort();
		}
	}

	pub(crate) fn take_completion(&mut self) -> Option<Completion> {
		self.completion.take()
	}
}
impl Drop for SagaEntry {
	fn drop(&mut self) {
		self.disarm();
	}
}

/// Sharded map of in-flight sagas keyed by correlation id.
///
/// Work on a single saga happens under that key's shard lock, so a reply and a timeout for the
/// same correlation id never interleave. Different keys proceed in parallel.
#[derive(Clone, Default)]
pub struct SagaStore {
	entries: Arc<DashMap<CorrelationId, SagaEntry>>,
}
impl SagaStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub(crate) fn insert(&self, entry: SagaEntry) -> Result<()> {
		let correlation_id = entry.state.correlation_id;

		match self.entries.entry(correlation_id) {
			Entry::Occupied(_) => Err(Error::DuplicateCorrelation { correlation_id }),
			Entry::Vacant(slot) => {
				slot.insert(entry);

				Ok(())
			},
		}
	}

	/// Runs `f` against the saga while holding its shard lock. Returns `None` for unknown ids.
	///
	/// `f` must not await or touch the store again.
	pub(crate) fn with_saga<R>(
		&self,
		correlation_id: &CorrelationId,
		f: impl FnOnce(&mut SagaEntry) -> R,
	) -> Option<R> {
		self.entries.get_mut(correlation_id).map(|mut entry| f(entry.value_mut()))
	}

	pub(crate) fn remove(&self, correlation_id: &CorrelationId) -> Option<SagaEntry> {
		self.entries.remove(correlation_id).map(|(_, entry)| entry)
	}

	pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
		self.entries.contains_key(correlation_id)
	}

	pub fn phase(&self, correlation_id: &CorrelationId) -> Option<SagaPhase> {
		self.entries.get(correlation_id).map(|entry| entry.state.phase)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
