use std::{sync::Arc, time::Duration};

use tokio::{sync::oneshot, task::AbortHandle};
use tracing::{debug, info, warn};

use sift_bus::RequestPublisher;
use sift_config::Config;
use sift_domain::{
	AnswerStage, CorrelationId, ExpandStage, RankStage, ReplyEnvelope, RetrieveStage, Stage,
	StageRequest,
};

use crate::{
	client::StageClient,
	error::{Error, Result},
	handle::SearchHandle,
	saga::{IgnoreReason, SagaEvent, SagaPlan, SagaState, Transition},
	search::SearchResponse,
	store::{SagaEntry, SagaStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
	pub expand: Duration,
	pub retrieve: Duration,
	pub rank: Duration,
	pub answer: Duration,
}
impl StageTimeouts {
	pub fn from_config(cfg: &sift_config::StageTimeouts) -> Self {
		Self {
			expand: Duration::from_millis(cfg.expand_ms),
			retrieve: Duration::from_millis(cfg.retrieve_ms),
			rank: Duration::from_millis(cfg.rank_ms),
			answer: Duration::from_millis(cfg.answer_ms),
		}
	}

	pub fn for_stage(&self, stage: Stage) -> Duration {
		match stage {
			Stage::Expand => self.expand,
			Stage::Retrieve => self.retrieve,
			Stage::Rank => self.rank,
			Stage::Answer => self.answer,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
	pub timeouts: StageTimeouts,
	pub top_k: u32,
	pub final_size: u32,
	pub max_variants: u32,
	pub answer: bool,
}
impl PipelineSettings {
	pub fn from_config(cfg: &Config) -> Self {
		Self {
			timeouts: StageTimeouts::from_config(&cfg.pipeline.timeouts),
			top_k: cfg.pipeline.top_k,
			final_size: cfg.pipeline.final_size,
			max_variants: cfg.expansion.max_queries,
			answer: cfg.pipeline.answer,
		}
	}

	/// Upper bound on how long a search can stay in flight when no stage ever replies.
	pub fn worst_case_latency(&self, answer: bool) -> Duration {
		let mut total = self.timeouts.expand + self.timeouts.retrieve + self.timeouts.rank;

		if answer {
			total += self.timeouts.answer;
		}

		total
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
	Applied,
	Ignored(IgnoreReason),
}

/// Drives every in-flight saga: dispatches stage requests, arms stage timers, and resolves
/// callers when a saga reaches a terminal phase.
#[derive(Clone)]
pub struct Orchestrator {
	inner: Arc<Inner>,
}

struct Inner {
	store: SagaStore,
	settings: PipelineSettings,
	expand: StageClient<ExpandStage>,
	retrieve: StageClient<RetrieveStage>,
	rank: StageClient<RankStage>,
	answer: StageClient<AnswerStage>,
}

impl Orchestrator {
	pub fn new(
		settings: PipelineSettings,
		publisher: Arc<dyn RequestPublisher>,
		store: SagaStore,
	) -> Self {
		let timeouts = settings.timeouts;

		Self {
			inner: Arc::new(Inner {
				store,
				settings,
				expand: StageClient::new(publisher.clone(), timeouts.expand),
				retrieve: StageClient::new(publisher.clone(), timeouts.retrieve),
				rank: StageClient::new(publisher.clone(), timeouts.rank),
				answer: StageClient::new(publisher, timeouts.answer),
			}),
		}
	}

	pub fn settings(&self) -> &PipelineSettings {
		&self.inner.settings
	}

	pub fn store(&self) -> &SagaStore {
		&self.inner.store
	}

	/// Registers a new saga and publishes its first stage request.
	///
	/// The returned handle resolves once the saga is done or has failed.
	pub async fn start(&self, query: String, plan: SagaPlan) -> Result<SearchHandle> {
		let correlation_id = CorrelationId::generate();
		let mut state = SagaState::new(correlation_id, query, plan);
		let request = match state.begin() {
			Transition::Dispatch(request) => request,
			_ =>
				return Err(Error::Dispatch {
					stage: Stage::Expand,
					message: "Saga did not start.".to_string(),
				}),
		};
		let (tx, rx) = oneshot::channel();

		self.inner.store.insert(SagaEntry::new(state, tx))?;
		self.inner.store.with_saga(&correlation_id, |entry| {
			entry.arm(self.spawn_timer(correlation_id, Stage::Expand));
		});

		info!(correlation_id = %correlation_id, "Search started.");

		let handle = SearchHandle::new(correlation_id, rx, self.clone());

		self.dispatch(correlation_id, request).await;

		Ok(handle)
	}

	pub async fn on_stage_reply(&self, envelope: ReplyEnvelope) -> EventOutcome {
		let correlation_id = envelope.correlation_id;
		let stage = envelope.stage();
		let outcome = self.advance(correlation_id, SagaEvent::Reply(envelope.reply)).await;

		if let EventOutcome::Ignored(reason) = &outcome {
			info!(
				correlation_id = %correlation_id,
				stage = %stage,
				reason = ?reason,
				"Discarded stale stage reply."
			);
		}

		outcome
	}

	pub async fn on_stage_timeout(
		&self,
		correlation_id: CorrelationId,
		stage: Stage,
	) -> EventOutcome {
		let outcome = self.advance(correlation_id, SagaEvent::Timeout(stage)).await;

		if let EventOutcome::Ignored(reason) = &outcome {
			debug!(
				correlation_id = %correlation_id,
				stage = %stage,
				reason = ?reason,
				"Stage timer fired after the stage settled."
			);
		}

		outcome
	}

	/// Drops a saga. Late replies and timers for it are ignored afterwards.
	pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
		let removed = self.inner.store.remove(correlation_id).is_some();

		if removed {
			info!(correlation_id = %correlation_id, "Search cancelled.");
		}

		removed
	}

	async fn advance(&self, correlation_id: CorrelationId, event: SagaEvent) -> EventOutcome {
		let applied = self.inner.store.with_saga(&correlation_id, |entry| {
			let before = entry.state.degraded.len();
			let transition = entry.state.apply(event);

			for degradation in &entry.state.degraded[before..] {
				warn!(
					correlation_id = %correlation_id,
					stage = %degradation.stage,
					reason = ?degradation.reason,
					"Stage degraded; applying fallback."
				);
			}

			match &transition {
				Transition::Dispatch(request) =>
					entry.arm(self.spawn_timer(correlation_id, request.stage())),
				Transition::Complete(_) => entry.disarm(),
				Transition::Ignored(_) => {},
			}

			transition
		});
		let Some(transition) = applied else {
			return EventOutcome::Ignored(IgnoreReason::UnknownCorrelation);
		};

		match transition {
			Transition::Ignored(reason) => EventOutcome::Ignored(reason),
			Transition::Dispatch(request) => {
				self.dispatch(correlation_id, request).await;

				EventOutcome::Applied
			},
			Transition::Complete(response) => {
				info!(
					correlation_id = %correlation_id,
					results = response.results.len(),
					degraded = response.degraded.len(),
					"Search completed."
				);

				self.resolve(&correlation_id, Ok(response));

				EventOutcome::Applied
			},
		}
	}

	async fn dispatch(&self, correlation_id: CorrelationId, request: StageRequest) {
		let stage = request.stage();
		let inner = &self.inner;
		let result = match request {
			StageRequest::Expand(request) => inner.expand.send(correlation_id, request).await,
			StageRequest::Retrieve(request) => inner.retrieve.send(correlation_id, request).await,
			StageRequest::Rank(request) => inner.rank.send(correlation_id, request).await,
			StageRequest::Answer(request) => inner.answer.send(correlation_id, request).await,
		};

		if let Err(err) = result {
			self.abort(correlation_id, stage, err);
		}
	}

	/// Fails the saga after a publish error, unless a timer already moved it past `stage`.
	fn abort(&self, correlation_id: CorrelationId, stage: Stage, err: sift_bus::Error) {
		let failed = self
			.inner
			.store
			.with_saga(&correlation_id, |entry| entry.state.fail(stage))
			.unwrap_or(false);

		if !failed {
			debug!(
				correlation_id = %correlation_id,
				stage = %stage,
				error = %err,
				"Publish failed after the stage settled."
			);

			return;
		}

		tracing::error!(
			correlation_id = %correlation_id,
			stage = %stage,
			error = %err,
			"Failed to dispatch stage request."
		);

		self.resolve(&correlation_id, Err(Error::Dispatch { stage, message: err.to_string() }));
	}

	fn resolve(&self, correlation_id: &CorrelationId, result: Result<SearchResponse>) {
		let Some(mut entry) = self.inner.store.remove(correlation_id) else {
			return;
		};

		let Some(completion) = entry.take_completion() else {
			return;
		};

		if completion.send(result).is_err() {
			debug!(correlation_id = %correlation_id, "Search caller went away before resolution.");
		}
	}

	fn spawn_timer(&self, correlation_id: CorrelationId, stage: Stage) -> AbortHandle {
		let orchestrator = self.clone();
		let delay = self.inner.settings.timeouts.for_stage(stage);

		tokio::spawn(async move {
			tokio::time::sleep(delay).await;

			// Detached so that arming the next stage timer cannot abort this task mid-transition.
			tokio::spawn(async move {
				orchestrator.on_stage_timeout(correlation_id, stage).await;
			});
		})
		.abort_handle()
	}
}
