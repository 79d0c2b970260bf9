//! Per-request state machine.
//!
//! [`SagaState::apply`] is the single transition function: it consumes one event (a stage
//! reply or a stage timeout) and reports what the coordinator has to do next. It never touches
//! the bus, timers, or the store.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use sift_domain::{
	AnswerRequest, Candidate, CorrelationId, ExpandRequest, RankRequest, RankedResult,
	RetrieveReply, RetrieveRequest, SourceTag, Stage, StageReply, StageRequest, fusion,
};

use crate::{fallback::FallbackPolicy, search::SearchResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaPhase {
	Created,
	Expanding,
	Retrieving,
	Ranking,
	Answering,
	Done,
	Failed,
}
impl SagaPhase {
	pub fn awaiting(self) -> Option<Stage> {
		match self {
			Self::Expanding => Some(Stage::Expand),
			Self::Retrieving => Some(Stage::Retrieve),
			Self::Ranking => Some(Stage::Rank),
			Self::Answering => Some(Stage::Answer),
			Self::Created | Self::Done | Self::Failed => None,
		}
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Done | Self::Failed)
	}

	fn awaiting_stage(stage: Stage) -> Self {
		match stage {
			Stage::Expand => Self::Expanding,
			Stage::Retrieve => Self::Retrieving,
			Stage::Rank => Self::Ranking,
			Stage::Answer => Self::Answering,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SagaPlan {
	pub top_k: u32,
	pub final_size: u32,
	pub max_variants: u32,
	pub answer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum DegradeReason {
	Timeout,
	RemoteError(String),
	MalformedReply(String),
	SourceUnavailable(SourceTag),
}

/// A stage failure that was recovered locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
	pub stage: Stage,
	pub reason: DegradeReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SagaEvent {
	Reply(StageReply),
	Timeout(Stage),
}
impl SagaEvent {
	pub fn stage(&self) -> Stage {
		match self {
			Self::Reply(reply) => reply.stage(),
			Self::Timeout(stage) => *stage,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
	UnknownCorrelation,
	NotAwaiting { awaiting: Option<Stage>, received: Stage },
	WrongChannel { channel: Stage, received: Stage },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
	Ignored(IgnoreReason),
	Dispatch(StageRequest),
	Complete(SearchResponse),
}

/// A stage result after validation, whether it came from a reply or a fallback.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StageOutput {
	Expanded(Vec<String>),
	Retrieved(RetrieveReply),
	Ranked(Vec<RankedResult>),
	Answered(Option<String>),
}

#[derive(Debug, Clone)]
pub struct SagaState {
	pub correlation_id: CorrelationId,
	pub query: String,
	pub phase: SagaPhase,
	pub plan: SagaPlan,
	pub variants: Vec<String>,
	pub retrieved: Vec<Candidate>,
	pub ranked: Vec<RankedResult>,
	pub answer: Option<String>,
	pub degraded: Vec<Degradation>,
}
impl SagaState {
	pub fn new(correlation_id: CorrelationId, query: String, plan: SagaPlan) -> Self {
		Self {
			correlation_id,
			query,
			phase: SagaPhase::Created,
			plan,
			variants: Vec::new(),
			retrieved: Vec::new(),
			ranked: Vec::new(),
			answer: None,
			degraded: Vec::new(),
		}
	}

	/// Moves a fresh saga to the first stage.
	pub fn begin(&mut self) -> Transition {
		if self.phase != SagaPhase::Created {
			return Transition::Ignored(IgnoreReason::NotAwaiting {
				awaiting: self.phase.awaiting(),
				received: Stage::Expand,
			});
		}

		self.dispatch(StageRequest::Expand(ExpandRequest {
			query: self.query.clone(),
			max_variants: self.plan.max_variants,
		}))
	}

	pub fn apply(&mut self, event: SagaEvent) -> Transition {
		let stage = event.stage();

		if self.phase.awaiting() != Some(stage) {
			return Transition::Ignored(IgnoreReason::NotAwaiting {
				awaiting: self.phase.awaiting(),
				received: stage,
			});
		}

		let output = match event {
			SagaEvent::Timeout(_) => self.fall_back(stage, DegradeReason::Timeout),
			SagaEvent::Reply(StageReply::Failed { message, .. }) =>
				self.fall_back(stage, DegradeReason::RemoteError(message)),
			SagaEvent::Reply(reply) => match self.validate(reply) {
				Ok(output) => output,
				Err(problem) => self.fall_back(stage, DegradeReason::MalformedReply(problem)),
			},
		};

		self.record(output)
	}

	/// Marks the saga failed if it is still waiting on `stage`. Returns whether it did.
	pub fn fail(&mut self, stage: Stage) -> bool {
		if self.phase.awaiting() != Some(stage) {
			return false;
		}

		self.phase = SagaPhase::Failed;

		true
	}

	fn fall_back(&mut self, stage: Stage, reason: DegradeReason) -> StageOutput {
		self.degraded.push(Degradation { stage, reason });

		FallbackPolicy::for_stage(stage).output(self)
	}

	fn validate(&self, reply: StageReply) -> Result<StageOutput, String> {
		match reply {
			StageReply::Expand(reply) => {
				let mut seen = HashSet::new();
				let variants: Vec<String> = reply
					.variants
					.iter()
					.map(|variant| variant.trim())
					.filter(|variant| !variant.is_empty() && seen.insert(variant.to_string()))
					.take(self.plan.max_variants.max(1) as usize)
					.map(str::to_string)
					.collect();

				if variants.is_empty() {
					return Err("expansion returned no usable variants".to_string());
				}

				Ok(StageOutput::Expanded(variants))
			},
			StageReply::Retrieve(reply) => {
				if let Some(candidate) =
					reply.candidates.iter().find(|candidate| candidate.source == SourceTag::Fused)
				{
					return Err(format!(
						"retrieval candidate {} is not tagged with a source list",
						candidate.id
					));
				}

				Ok(StageOutput::Retrieved(reply))
			},
			StageReply::Rank(reply) => {
				if reply.ranked.is_empty() {
					return Err("ranking returned no results".to_string());
				}

				let known: HashSet<&str> =
					self.retrieved.iter().map(|candidate| candidate.id.as_str()).collect();
				let mut seen = HashSet::new();

				for result in &reply.ranked {
					if !known.contains(result.id.as_str()) {
						return Err(format!("ranked id {} was never a candidate", result.id));
					}
					if !seen.insert(result.id.as_str()) {
						return Err(format!("ranked id {} appears more than once", result.id));
					}
					if !result.score.is_finite() {
						return Err(format!("ranked id {} has a non-finite score", result.id));
					}
				}

				Ok(StageOutput::Ranked(reply.ranked))
			},
			StageReply::Answer(reply) => {
				if reply.answer.trim().is_empty() {
					return Err("answer is empty".to_string());
				}

				Ok(StageOutput::Answered(Some(reply.answer)))
			},
			StageReply::Failed { stage, .. } => Err(format!("unexpected failure reply for {stage}")),
		}
	}

	fn record(&mut self, output: StageOutput) -> Transition {
		match output {
			StageOutput::Expanded(variants) => {
				self.variants = variants;

				self.dispatch(StageRequest::Retrieve(RetrieveRequest {
					query: self.query.clone(),
					variants: self.variants.clone(),
					top_k: self.plan.top_k,
				}))
			},
			StageOutput::Retrieved(reply) => {
				self.retrieved = self.combine_sources(reply);

				if self.retrieved.is_empty() {
					return self.complete();
				}

				self.dispatch(StageRequest::Rank(RankRequest {
					query: self.query.clone(),
					candidates: self.retrieved.clone(),
				}))
			},
			StageOutput::Ranked(mut ranked) => {
				ranked.truncate(self.plan.final_size as usize);

				self.ranked = ranked;

				if self.plan.answer && !self.ranked.is_empty() {
					return self.dispatch(StageRequest::Answer(AnswerRequest {
						query: self.query.clone(),
						context: self.ranked.clone(),
					}));
				}

				self.complete()
			},
			StageOutput::Answered(answer) => {
				self.answer = answer;

				self.complete()
			},
		}
	}

	/// Fuses the dense and sparse lists, or passes a lone surviving list through unchanged.
	fn combine_sources(&mut self, reply: RetrieveReply) -> Vec<Candidate> {
		let top_k = self.plan.top_k as usize;
		let mut surviving = Vec::with_capacity(2);

		for source in [SourceTag::Dense, SourceTag::Sparse] {
			if reply.failed_sources.contains(&source) {
				self.degraded.push(Degradation {
					stage: Stage::Retrieve,
					reason: DegradeReason::SourceUnavailable(source),
				});
			} else {
				surviving.push(reply.source_list(source));
			}
		}

		match surviving.as_slice() {
			[dense, sparse] => fusion::merge(dense, sparse, top_k)
				.into_iter()
				.map(Candidate::from)
				.collect(),
			[only] => only.iter().take(top_k).cloned().collect(),
			_ => Vec::new(),
		}
	}

	fn dispatch(&mut self, request: StageRequest) -> Transition {
		self.phase = SagaPhase::awaiting_stage(request.stage());

		Transition::Dispatch(request)
	}

	fn complete(&mut self) -> Transition {
		self.phase = SagaPhase::Done;

		Transition::Complete(SearchResponse {
			correlation_id: self.correlation_id,
			query: self.query.clone(),
			variants: self.variants.clone(),
			results: self.ranked.clone(),
			answer: self.answer.clone(),
			degraded: self.degraded.clone(),
		})
	}
}

#[cfg(test)]
mod tests {
	use sift_domain::{AnswerReply, ExpandReply, RankReply};

	use super::*;

	fn plan(answer: bool) -> SagaPlan {
		SagaPlan { top_k: 10, final_size: 2, max_variants: 3, answer }
	}

	fn saga(answer: bool) -> SagaState {
		let mut state =
			SagaState::new(CorrelationId::generate(), "rust saga".to_string(), plan(answer));

		assert!(matches!(state.begin(), Transition::Dispatch(StageRequest::Expand(_))));

		state
	}

	fn candidate(id: &str, source: SourceTag) -> Candidate {
		Candidate { id: id.to_string(), content: format!("{id} body"), score: 1.0, source }
	}

	fn retrieve_reply(failed: Vec<SourceTag>) -> StageReply {
		StageReply::Retrieve(RetrieveReply {
			candidates: vec![
				candidate("d1", SourceTag::Dense),
				candidate("d2", SourceTag::Dense),
				candidate("d3", SourceTag::Dense),
				candidate("d2", SourceTag::Sparse),
				candidate("d4", SourceTag::Sparse),
				candidate("d1", SourceTag::Sparse),
			],
			failed_sources: failed,
		})
	}

	fn expand(state: &mut SagaState) -> Transition {
		state.apply(SagaEvent::Reply(StageReply::Expand(ExpandReply {
			variants: vec!["rust saga".to_string(), "saga pattern rust".to_string()],
		})))
	}

	fn rank_reply(ids: &[&str]) -> StageReply {
		StageReply::Rank(RankReply {
			ranked: ids
				.iter()
				.enumerate()
				.map(|(idx, id)| RankedResult {
					id: id.to_string(),
					content: format!("{id} body"),
					score: 1.0 - idx as f64 * 0.1,
				})
				.collect(),
		})
	}

	#[test]
	fn happy_path_walks_every_stage_in_order() {
		let mut state = saga(true);

		assert!(matches!(expand(&mut state), Transition::Dispatch(StageRequest::Retrieve(_))));
		assert_eq!(state.phase, SagaPhase::Retrieving);

		let Transition::Dispatch(StageRequest::Rank(rank)) =
			state.apply(SagaEvent::Reply(retrieve_reply(Vec::new())))
		else {
			panic!("Expected a rank dispatch.");
		};
		let ids: Vec<&str> = rank.candidates.iter().map(|candidate| candidate.id.as_str()).collect();

		assert_eq!(ids, vec!["d2", "d1", "d4", "d3"]);
		assert!(rank.candidates.iter().all(|candidate| candidate.source == SourceTag::Fused));

		let Transition::Dispatch(StageRequest::Answer(answer)) =
			state.apply(SagaEvent::Reply(rank_reply(&["d4", "d1", "d2"])))
		else {
			panic!("Expected an answer dispatch.");
		};

		assert_eq!(answer.context.len(), 2);

		let Transition::Complete(response) =
			state.apply(SagaEvent::Reply(StageReply::Answer(AnswerReply {
				answer: "Use a coordinator.".to_string(),
			})))
		else {
			panic!("Expected completion.");
		};

		assert_eq!(state.phase, SagaPhase::Done);
		assert_eq!(response.answer.as_deref(), Some("Use a coordinator."));
		assert_eq!(response.results.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec![
			"d4", "d1"
		]);
		assert!(response.degraded.is_empty());
	}

	#[test]
	fn replies_for_other_stages_are_ignored() {
		let mut state = saga(false);
		let transition = state.apply(SagaEvent::Reply(rank_reply(&["d1"])));

		assert_eq!(
			transition,
			Transition::Ignored(IgnoreReason::NotAwaiting {
				awaiting: Some(Stage::Expand),
				received: Stage::Rank,
			})
		);
		assert_eq!(state.phase, SagaPhase::Expanding);
	}

	#[test]
	fn expansion_timeout_falls_back_to_original_query() {
		let mut state = saga(false);
		let Transition::Dispatch(StageRequest::Retrieve(retrieve)) =
			state.apply(SagaEvent::Timeout(Stage::Expand))
		else {
			panic!("Expected a retrieve dispatch.");
		};

		assert_eq!(retrieve.variants, vec!["rust saga".to_string()]);
		assert_eq!(state.degraded, vec![Degradation {
			stage: Stage::Expand,
			reason: DegradeReason::Timeout,
		}]);
	}

	#[test]
	fn blank_expansion_is_treated_as_malformed() {
		let mut state = saga(false);
		let transition = state.apply(SagaEvent::Reply(StageReply::Expand(ExpandReply {
			variants: vec!["  ".to_string()],
		})));

		assert!(matches!(transition, Transition::Dispatch(StageRequest::Retrieve(_))));
		assert_eq!(state.variants, vec!["rust saga".to_string()]);
		assert!(matches!(state.degraded[0].reason, DegradeReason::MalformedReply(_)));
	}

	#[test]
	fn expansion_variants_are_deduplicated_and_capped() {
		let mut state = saga(false);

		state.apply(SagaEvent::Reply(StageReply::Expand(ExpandReply {
			variants: vec![
				"a".to_string(),
				" a ".to_string(),
				"b".to_string(),
				"c".to_string(),
				"d".to_string(),
			],
		})));

		assert_eq!(state.variants, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
	}

	#[test]
	fn one_failed_source_skips_fusion() {
		let mut state = saga(false);

		expand(&mut state);

		let Transition::Dispatch(StageRequest::Rank(rank)) =
			state.apply(SagaEvent::Reply(retrieve_reply(vec![SourceTag::Dense])))
		else {
			panic!("Expected a rank dispatch.");
		};
		let ids: Vec<&str> = rank.candidates.iter().map(|candidate| candidate.id.as_str()).collect();

		assert_eq!(ids, vec!["d2", "d4", "d1"]);
		assert!(rank.candidates.iter().all(|candidate| candidate.source == SourceTag::Sparse));
		assert_eq!(state.degraded, vec![Degradation {
			stage: Stage::Retrieve,
			reason: DegradeReason::SourceUnavailable(SourceTag::Dense),
		}]);
	}

	#[test]
	fn retrieval_timeout_resolves_with_no_results() {
		let mut state = saga(true);

		expand(&mut state);

		let Transition::Complete(response) = state.apply(SagaEvent::Timeout(Stage::Retrieve))
		else {
			panic!("Expected completion.");
		};

		assert!(response.results.is_empty());
		assert!(response.answer.is_none());
		assert_eq!(response.degraded.len(), 1);
	}

	#[test]
	fn ranking_timeout_uses_fused_order_with_zero_scores() {
		let mut state = saga(false);

		expand(&mut state);
		state.apply(SagaEvent::Reply(retrieve_reply(Vec::new())));

		let Transition::Complete(response) = state.apply(SagaEvent::Timeout(Stage::Rank)) else {
			panic!("Expected completion.");
		};

		assert_eq!(response.results.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec![
			"d2", "d1"
		]);
		assert!(response.results.iter().all(|result| result.score == 0.0));
	}

	#[test]
	fn ranked_ids_outside_the_candidates_trigger_fallback() {
		let mut state = saga(false);

		expand(&mut state);
		state.apply(SagaEvent::Reply(retrieve_reply(Vec::new())));

		let Transition::Complete(response) =
			state.apply(SagaEvent::Reply(rank_reply(&["d9", "d1"])))
		else {
			panic!("Expected completion.");
		};

		assert!(response.results.iter().all(|result| result.score == 0.0));
		assert!(matches!(response.degraded[0].reason, DegradeReason::MalformedReply(_)));
	}

	#[test]
	fn repeated_ranked_ids_trigger_fallback() {
		let mut state = saga(false);

		expand(&mut state);
		state.apply(SagaEvent::Reply(retrieve_reply(Vec::new())));

		let Transition::Complete(response) =
			state.apply(SagaEvent::Reply(rank_reply(&["d1", "d1", "d1"])))
		else {
			panic!("Expected completion.");
		};

		assert_eq!(response.results.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec![
			"d2", "d1"
		]);
		assert!(response.results.iter().all(|result| result.score == 0.0));
		assert_eq!(response.degraded, vec![Degradation {
			stage: Stage::Rank,
			reason: DegradeReason::MalformedReply("ranked id d1 appears more than once".to_string()),
		}]);
	}

	#[test]
	fn empty_ranking_keeps_the_fused_candidates() {
		let mut state = saga(false);

		expand(&mut state);
		state.apply(SagaEvent::Reply(retrieve_reply(Vec::new())));

		let Transition::Complete(response) = state.apply(SagaEvent::Reply(rank_reply(&[])))
		else {
			panic!("Expected completion.");
		};

		assert_eq!(response.results.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec![
			"d2", "d1"
		]);
		assert_eq!(response.degraded, vec![Degradation {
			stage: Stage::Rank,
			reason: DegradeReason::MalformedReply("ranking returned no results".to_string()),
		}]);
	}

	#[test]
	fn reply_after_fallback_does_not_advance_again() {
		let mut state = saga(false);

		expand(&mut state);
		state.apply(SagaEvent::Timeout(Stage::Retrieve));

		let late = state.apply(SagaEvent::Reply(retrieve_reply(Vec::new())));

		assert!(matches!(late, Transition::Ignored(IgnoreReason::NotAwaiting { .. })));
		assert_eq!(state.phase, SagaPhase::Done);
		assert!(state.retrieved.is_empty());
	}

	#[test]
	fn timeout_after_reply_is_a_no_op() {
		let mut state = saga(false);

		expand(&mut state);

		let stale = state.apply(SagaEvent::Timeout(Stage::Expand));

		assert!(matches!(stale, Transition::Ignored(_)));
		assert!(state.degraded.is_empty());
		assert_eq!(state.phase, SagaPhase::Retrieving);
	}

	#[test]
	fn remote_answer_error_omits_the_answer() {
		let mut state = saga(true);

		expand(&mut state);
		state.apply(SagaEvent::Reply(retrieve_reply(Vec::new())));
		state.apply(SagaEvent::Reply(rank_reply(&["d1"])));

		let Transition::Complete(response) = state.apply(SagaEvent::Reply(StageReply::Failed {
			stage: Stage::Answer,
			message: "model overloaded".to_string(),
		})) else {
			panic!("Expected completion.");
		};

		assert!(response.answer.is_none());
		assert_eq!(response.results.len(), 1);
		assert_eq!(response.degraded, vec![Degradation {
			stage: Stage::Answer,
			reason: DegradeReason::RemoteError("model overloaded".to_string()),
		}]);
	}

	#[test]
	fn fail_only_applies_to_the_awaited_stage() {
		let mut state = saga(false);

		assert!(!state.fail(Stage::Rank));
		assert!(state.fail(Stage::Expand));
		assert_eq!(state.phase, SagaPhase::Failed);
		assert!(matches!(state.apply(SagaEvent::Timeout(Stage::Expand)), Transition::Ignored(_)));
	}

	#[test]
	fn begin_only_runs_once() {
		let mut state = saga(false);

		assert!(matches!(state.begin(), Transition::Ignored(_)));
	}
}
