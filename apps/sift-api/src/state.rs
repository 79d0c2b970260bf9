use std::sync::Arc;

use tokio::task::JoinHandle;

use sift_bus::{InMemoryBus, ReplyPublisher};
use sift_config::Config;
use sift_domain::Stage;
use sift_service::SiftService;
use sift_stages::{
	AnswerGenerator, HttpSearchBackend, HybridRetriever, QueryExpander, Reranker,
	spawn_stage_worker,
};

#[derive(Clone)]
pub struct AppState {
	pub service: SiftService,
}
impl AppState {
	/// Wires the bus, the reply router, and one HTTP-backed worker per stage.
	pub fn new(config: &Config) -> color_eyre::Result<(Self, Vec<JoinHandle<()>>)> {
		let (bus, mut receivers) = InMemoryBus::new(config.bus.channel_capacity);
		let service = SiftService::new(config, Arc::new(bus.clone()));
		let replies: Arc<dyn ReplyPublisher> = Arc::new(bus);
		let concurrency = config.bus.worker_concurrency;
		let providers = &config.providers;
		let mut tasks = service.router().spawn(receivers.take_all_replies());

		tasks.push(spawn_stage_worker(
			Arc::new(QueryExpander::new(&providers.expansion, &config.expansion)?),
			receivers.take_requests(Stage::Expand)?,
			replies.clone(),
			concurrency,
		));
		tasks.push(spawn_stage_worker(
			Arc::new(HybridRetriever::new(
				HttpSearchBackend::new(&providers.dense)?,
				HttpSearchBackend::new(&providers.sparse)?,
			)),
			receivers.take_requests(Stage::Retrieve)?,
			replies.clone(),
			concurrency,
		));
		tasks.push(spawn_stage_worker(
			Arc::new(Reranker::new(&providers.rerank)?),
			receivers.take_requests(Stage::Rank)?,
			replies.clone(),
			concurrency,
		));
		tasks.push(spawn_stage_worker(
			Arc::new(AnswerGenerator::new(&providers.answer)?),
			receivers.take_requests(Stage::Answer)?,
			replies,
			concurrency,
		));

		Ok((Self::from_service(service), tasks))
	}

	pub fn from_service(service: SiftService) -> Self {
		Self { service }
	}
}
