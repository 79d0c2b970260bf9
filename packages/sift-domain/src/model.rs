use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque token identifying one in-flight search across every stage message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);
impl CorrelationId {
	pub fn generate() -> Self {
		Self(Uuid::new_v4())
	}
}
impl fmt::Display for CorrelationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.hyphenated())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
	Dense,
	Sparse,
	Fused,
}
impl SourceTag {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Dense => "dense",
			Self::Sparse => "sparse",
			Self::Fused => "fused",
		}
	}
}
impl fmt::Display for SourceTag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A retrieval hit. `id` is unique only within the list that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
	pub id: String,
	pub content: String,
	pub score: f64,
	pub source: SourceTag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
	pub id: String,
	pub content: String,
	pub score: f64,
}
impl From<RankedResult> for Candidate {
	fn from(result: RankedResult) -> Self {
		Self { id: result.id, content: result.content, score: result.score, source: SourceTag::Fused }
	}
}
