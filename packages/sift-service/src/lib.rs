//! Saga coordination for the hybrid search pipeline.
//!
//! A search is a saga keyed by its correlation id. The [`Orchestrator`] publishes one stage
//! request at a time, the [`ResultRouter`] feeds replies back in, and per-stage timers make sure
//! every saga reaches a terminal phase even when stages never answer.

pub mod client;
pub mod fallback;
pub mod handle;
pub mod orchestrator;
pub mod router;
pub mod saga;
pub mod search;
pub mod store;

mod error;

pub use client::StageClient;
pub use error::{Error, Result};
pub use fallback::FallbackPolicy;
pub use handle::SearchHandle;
pub use orchestrator::{EventOutcome, Orchestrator, PipelineSettings, StageTimeouts};
pub use router::ResultRouter;
pub use saga::{DegradeReason, Degradation, IgnoreReason, SagaPhase, SagaPlan};
pub use search::{MAX_QUERY_CHARS, MAX_RESULT_LIMIT, SearchRequest, SearchResponse};
pub use store::SagaStore;

use std::sync::Arc;

use sift_bus::RequestPublisher;
use sift_config::Config;

#[derive(Clone)]
pub struct SiftService {
	pub orchestrator: Orchestrator,
}
impl SiftService {
	pub fn new(cfg: &Config, publisher: Arc<dyn RequestPublisher>) -> Self {
		Self::with_settings(PipelineSettings::from_config(cfg), publisher)
	}

	pub fn with_settings(settings: PipelineSettings, publisher: Arc<dyn RequestPublisher>) -> Self {
		Self { orchestrator: Orchestrator::new(settings, publisher, SagaStore::new()) }
	}

	pub fn router(&self) -> ResultRouter {
		ResultRouter::new(self.orchestrator.clone())
	}

	pub fn store(&self) -> &SagaStore {
		self.orchestrator.store()
	}

	pub fn settings(&self) -> &PipelineSettings {
		self.orchestrator.settings()
	}
}
