use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Candidate, CorrelationId, RankedResult, SourceTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
	Expand,
	Retrieve,
	Rank,
	Answer,
}
impl Stage {
	pub const ALL: [Self; 4] = [Self::Expand, Self::Retrieve, Self::Rank, Self::Answer];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Expand => "expand",
			Self::Retrieve => "retrieve",
			Self::Rank => "rank",
			Self::Answer => "answer",
		}
	}

	pub fn request_channel(self) -> &'static str {
		match self {
			Self::Expand => "sift.expand.request",
			Self::Retrieve => "sift.retrieve.request",
			Self::Rank => "sift.rank.request",
			Self::Answer => "sift.answer.request",
		}
	}

	pub fn reply_channel(self) -> &'static str {
		match self {
			Self::Expand => "sift.expand.reply",
			Self::Retrieve => "sift.retrieve.reply",
			Self::Rank => "sift.rank.reply",
			Self::Answer => "sift.answer.reply",
		}
	}
}
impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandRequest {
	pub query: String,
	pub max_variants: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandReply {
	pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveRequest {
	pub query: String,
	pub variants: Vec<String>,
	pub top_k: u32,
}

/// Candidates from both sources, each tagged with its origin. A source listed in
/// `failed_sources` contributed nothing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RetrieveReply {
	pub candidates: Vec<Candidate>,
	#[serde(default)]
	pub failed_sources: Vec<SourceTag>,
}
impl RetrieveReply {
	pub fn source_list(&self, source: SourceTag) -> Vec<Candidate> {
		self.candidates.iter().filter(|candidate| candidate.source == source).cloned().collect()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankRequest {
	pub query: String,
	pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankReply {
	pub ranked: Vec<RankedResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequest {
	pub query: String,
	pub context: Vec<RankedResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerReply {
	pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageRequest {
	Expand(ExpandRequest),
	Retrieve(RetrieveRequest),
	Rank(RankRequest),
	Answer(AnswerRequest),
}
impl StageRequest {
	pub fn stage(&self) -> Stage {
		match self {
			Self::Expand(_) => Stage::Expand,
			Self::Retrieve(_) => Stage::Retrieve,
			Self::Rank(_) => Stage::Rank,
			Self::Answer(_) => Stage::Answer,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageReply {
	Expand(ExpandReply),
	Retrieve(RetrieveReply),
	Rank(RankReply),
	Answer(AnswerReply),
	Failed { stage: Stage, message: String },
}
impl StageReply {
	pub fn stage(&self) -> Stage {
		match self {
			Self::Expand(_) => Stage::Expand,
			Self::Retrieve(_) => Stage::Retrieve,
			Self::Rank(_) => Stage::Rank,
			Self::Answer(_) => Stage::Answer,
			Self::Failed { stage, .. } => *stage,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
	pub correlation_id: CorrelationId,
	pub request: StageRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
	pub correlation_id: CorrelationId,
	pub reply: StageReply,
}
impl ReplyEnvelope {
	pub fn stage(&self) -> Stage {
		self.reply.stage()
	}
}

/// Ties a stage to its typed request and reply payloads so clients and workers can be written
/// once for every stage.
pub trait StageKind
where
	Self: Send + Sync + 'static,
{
	const STAGE: Stage;

	type Request: Send + 'static;
	type Reply: Send + 'static;

	fn wrap_request(request: Self::Request) -> StageRequest;

	fn unwrap_request(request: StageRequest) -> Option<Self::Request>;

	fn wrap_reply(reply: Self::Reply) -> StageReply;
}

pub struct ExpandStage;
impl StageKind for ExpandStage {
	type Reply = ExpandReply;
	type Request = ExpandRequest;

	const STAGE: Stage = Stage::Expand;

	fn wrap_request(request: Self::Request) -> StageRequest {
		StageRequest::Expand(request)
	}

	fn unwrap_request(request: StageRequest) -> Option<Self::Request> {
		match request {
			StageRequest::Expand(request) => Some(request),
			_ => None,
		}
	}

	fn wrap_reply(reply: Self::Reply) -> StageReply {
		StageReply::Expand(reply)
	}
}

pub struct RetrieveStage;
impl StageKind for RetrieveStage {
	type Reply = RetrieveReply;
	type Request = RetrieveRequest;

	const STAGE: Stage = Stage::Retrieve;

	fn wrap_request(request: Self::Request) -> StageRequest {
		StageRequest::Retrieve(request)
	}

	fn unwrap_request(request: StageRequest) -> Option<Self::Request> {
		match request {
			StageRequest::Retrieve(request) => Some(request),
			_ => None,
		}
	}

	fn wrap_reply(reply: Self::Reply) -> StageReply {
		StageReply::Retrieve(reply)
	}
}

pub struct RankStage;
impl StageKind for RankStage {
	type Reply = RankReply;
	type Request = RankRequest;

	const STAGE: Stage = Stage::Rank;

	fn wrap_request(request: Self::Request) -> StageRequest {
		StageRequest::Rank(request)
	}

	fn unwrap_request(request: StageRequest) -> Option<Self::Request> {
		match request {
			StageRequest::Rank(request) => Some(request),
			_ => None,
		}
	}

	fn wrap_reply(reply: Self::Reply) -> StageReply {
		StageReply::Rank(reply)
	}
}

pub struct AnswerStage;
impl StageKind for AnswerStage {
	type Reply = AnswerReply;
	type Request = AnswerRequest;

	const STAGE: Stage = Stage::Answer;

	fn wrap_request(request: Self::Request) -> StageRequest {
		StageRequest::Answer(request)
	}

	fn unwrap_request(request: StageRequest) -> Option<Self::Request> {
		match request {
			StageRequest::Answer(request) => Some(request),
			_ => None,
		}
	}

	fn wrap_reply(reply: Self::Reply) -> StageReply {
		StageReply::Answer(reply)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unwrap_rejects_other_stages() {
		let request = ExpandStage::wrap_request(ExpandRequest {
			query: "rust async".to_string(),
			max_variants: 3,
		});

		assert_eq!(request.stage(), Stage::Expand);
		assert!(RankStage::unwrap_request(request.clone()).is_none());
		assert!(ExpandStage::unwrap_request(request).is_some());
	}

	#[test]
	fn failed_reply_carries_its_stage() {
		let reply = StageReply::Failed { stage: Stage::Rank, message: "boom".to_string() };

		assert_eq!(reply.stage(), Stage::Rank);
	}

	#[test]
	fn reply_envelope_round_trips_through_json() {
		let envelope = ReplyEnvelope {
			correlation_id: CorrelationId::generate(),
			reply: StageReply::Expand(ExpandReply { variants: vec!["a".to_string()] }),
		};
		let json = serde_json::to_value(&envelope).expect("serialize failed");

		assert_eq!(json["reply"]["kind"], "expand");

		let decoded: ReplyEnvelope = serde_json::from_value(json).expect("deserialize failed");

		assert_eq!(decoded, envelope);
	}

	#[test]
	fn retrieve_reply_splits_by_source() {
		let reply = RetrieveReply {
			candidates: vec![
				Candidate {
					id: "a".to_string(),
					content: String::new(),
					score: 0.9,
					source: SourceTag::Dense,
				},
				Candidate {
					id: "b".to_string(),
					content: String::new(),
					score: 3.1,
					source: SourceTag::Sparse,
				},
			],
			failed_sources: Vec::new(),
		};

		assert_eq!(reply.source_list(SourceTag::Dense).len(), 1);
		assert_eq!(reply.source_list(SourceTag::Sparse)[0].id, "b");
	}
}
