//! Scripted stage workers and fixtures for pipeline tests.

mod error;

pub use error::{Error, Result};

use std::{
	marker::PhantomData,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use tokio::{sync::mpsc, task::JoinHandle, time};

use sift_bus::{BusReceivers, InMemoryBus, ReplyPublisher};
use sift_config::Config;
use sift_domain::{
	AnswerReply, AnswerStage, BoxFuture, Candidate, ExpandReply, ExpandStage, RankReply,
	RankStage, RankedResult, RequestEnvelope, RetrieveReply, RetrieveStage, SourceTag, Stage,
	StageKind,
};
use sift_stages::StageHandler;

const TEST_CONFIG_TOML: &str = include_str!("../fixtures/test_config.toml");

/// Valid config with short stage timeouts.
pub fn test_config() -> Result<Config> {
	Ok(sift_config::from_toml_str(TEST_CONFIG_TOML)?)
}

/// What a scripted stage does with one request.
pub enum Behavior<R> {
	Reply(R),
	ReplyAfter(Duration, R),
	Fail(String),
	/// Never replies.
	Hang,
}

type Script<K> = dyn Fn(<K as StageKind>::Request) -> Behavior<<K as StageKind>::Reply> + Send + Sync;

pub struct ScriptedHandler<K>
where
	K: StageKind,
{
	script: Box<Script<K>>,
	calls: AtomicUsize,
	_kind: PhantomData<fn() -> K>,
}
impl<K> ScriptedHandler<K>
where
	K: StageKind,
{
	pub fn new(
		script: impl Fn(K::Request) -> Behavior<K::Reply> + Send + Sync + 'static,
	) -> Arc<Self> {
		Arc::new(Self { script: Box::new(script), calls: AtomicUsize::new(0), _kind: PhantomData })
	}

	pub fn hang() -> Arc<Self> {
		Self::new(|_| Behavior::Hang)
	}

	pub fn fail(message: &str) -> Arc<Self> {
		let message = message.to_string();

		Self::new(move |_| Behavior::Fail(message.clone()))
	}

	/// Requests handled so far, including ones still hanging.
	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	async fn run(&self, request: K::Request) -> sift_stages::Result<K::Reply> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		match (self.script)(request) {
			Behavior::Reply(reply) => Ok(reply),
			Behavior::ReplyAfter(delay, reply) => {
				time::sleep(delay).await;

				Ok(reply)
			},
			Behavior::Fail(message) => Err(sift_stages::Error::InvalidResponse { message }),
			Behavior::Hang => std::future::pending().await,
		}
	}
}
impl<K> StageHandler for ScriptedHandler<K>
where
	K: StageKind,
{
	type Kind = K;

	fn handle<'a>(&'a self, request: K::Request) -> BoxFuture<'a, sift_stages::Result<K::Reply>> {
		Box::pin(self.run(request))
	}
}

/// One scripted handler per stage.
pub struct StageScript {
	pub expand: Arc<ScriptedHandler<ExpandStage>>,
	pub retrieve: Arc<ScriptedHandler<RetrieveStage>>,
	pub rank: Arc<ScriptedHandler<RankStage>>,
	pub answer: Arc<ScriptedHandler<AnswerStage>>,
}
impl StageScript {
	/// Every stage answers immediately. Retrieval returns `dense` and `sparse` ids as their
	/// source lists, ranking keeps the candidate order with descending scores.
	pub fn happy(dense: &[&str], sparse: &[&str]) -> Self {
		Self {
			expand: echo_expander(),
			retrieve: fixed_retriever(dense, sparse),
			rank: order_preserving_ranker(),
			answer: summarizing_answerer(),
		}
	}

	/// Spawns one worker per stage on `bus`, consuming the request receivers.
	pub fn spawn(
		&self,
		bus: &InMemoryBus,
		receivers: &mut BusReceivers,
		concurrency: usize,
	) -> Result<Vec<JoinHandle<()>>> {
		let replies: Arc<dyn ReplyPublisher> = Arc::new(bus.clone());

		Ok(vec![
			sift_stages::spawn_stage_worker(
				self.expand.clone(),
				receivers.take_requests(Stage::Expand)?,
				replies.clone(),
				concurrency,
			),
			sift_stages::spawn_stage_worker(
				self.retrieve.clone(),
				receivers.take_requests(Stage::Retrieve)?,
				replies.clone(),
				concurrency,
			),
			sift_stages::spawn_stage_worker(
				self.rank.clone(),
				receivers.take_requests(Stage::Rank)?,
				replies.clone(),
				concurrency,
			),
			sift_stages::spawn_stage_worker(
				self.answer.clone(),
				receivers.take_requests(Stage::Answer)?,
				replies,
				concurrency,
			),
		])
	}
}

/// Holds every request receiver open without answering, so no stage ever replies.
pub fn silence(receivers: &mut BusReceivers) -> Result<Vec<mpsc::Receiver<RequestEnvelope>>> {
	Stage::ALL.into_iter().map(|stage| Ok(receivers.take_requests(stage)?)).collect()
}

pub fn echo_expander() -> Arc<ScriptedHandler<ExpandStage>> {
	ScriptedHandler::<ExpandStage>::new(|request| {
		Behavior::Reply(ExpandReply {
			variants: vec![request.query.clone(), format!("{} overview", request.query)],
		})
	})
}

pub fn fixed_retriever(dense: &[&str], sparse: &[&str]) -> Arc<ScriptedHandler<RetrieveStage>> {
	let reply = retrieve_reply(dense, sparse);

	ScriptedHandler::<RetrieveStage>::new(move |_| Behavior::Reply(reply.clone()))
}

pub fn order_preserving_ranker() -> Arc<ScriptedHandler<RankStage>> {
	ScriptedHandler::<RankStage>::new(|request| {
		Behavior::Reply(RankReply {
			ranked: request
				.candidates
				.iter()
				.enumerate()
				.map(|(idx, candidate)| ranked(&candidate.id, 1.0 / (idx as f64 + 1.0)))
				.collect(),
		})
	})
}

pub fn summarizing_answerer() -> Arc<ScriptedHandler<AnswerStage>> {
	ScriptedHandler::<AnswerStage>::new(|request| {
		let ids: Vec<&str> = request.context.iter().map(|result| result.id.as_str()).collect();

		Behavior::Reply(AnswerReply { answer: format!("Answer from {}.", ids.join(", ")) })
	})
}

pub fn content_for(id: &str) -> String {
	format!("Document {id}.")
}

pub fn candidate(id: &str, source: SourceTag) -> Candidate {
	Candidate { id: id.to_string(), content: content_for(id), score: 1.0, source }
}

pub fn ranked(id: &str, score: f64) -> RankedResult {
	RankedResult { id: id.to_string(), content: content_for(id), score }
}

pub fn retrieve_reply(dense: &[&str], sparse: &[&str]) -> RetrieveReply {
	let candidates = dense
		.iter()
		.map(|id| candidate(id, SourceTag::Dense))
		.chain(sparse.iter().map(|id| candidate(id, SourceTag::Sparse)))
		.collect();

	RetrieveReply { candidates, failed_sources: Vec::new() }
}
