pub mod fusion;
pub mod message;
pub mod model;

use std::{future::Future, pin::Pin};

pub use fusion::{RRF_K, fuse, merge};
pub use message::{
	AnswerReply, AnswerRequest, AnswerStage, ExpandReply, ExpandRequest, ExpandStage, RankReply,
	RankRequest, RankStage, ReplyEnvelope, RequestEnvelope, RetrieveReply, RetrieveRequest,
	RetrieveStage, Stage, StageKind, StageReply, StageRequest,
};
pub use model::{Candidate, CorrelationId, RankedResult, SourceTag};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
