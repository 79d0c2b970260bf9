use serde::{Deserialize, Serialize};

use sift_domain::{CorrelationId, RankedResult};

use crate::{
	SiftService,
	error::{Error, Result},
	handle::SearchHandle,
	saga::{Degradation, SagaPlan},
};

pub const MAX_QUERY_CHARS: usize = 2_048;
/// Upper bound on caller-supplied `top_k` and `final_size`.
pub const MAX_RESULT_LIMIT: u32 = 1_000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
	pub query: String,
	pub top_k: Option<u32>,
	pub final_size: Option<u32>,
	pub answer: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
	pub correlation_id: CorrelationId,
	pub query: String,
	pub variants: Vec<String>,
	pub results: Vec<RankedResult>,
	pub answer: Option<String>,
	pub degraded: Vec<Degradation>,
}

impl SiftService {
	/// Runs one search end to end.
	pub async fn search(&self, req: SearchRequest) -> Result<SearchResponse> {
		self.start(req).await?.await
	}

	/// Starts a search and returns its handle without waiting for the result.
	pub async fn start(&self, req: SearchRequest) -> Result<SearchHandle> {
		let query = req.query.trim();

		if query.is_empty() {
			return Err(Error::InvalidRequest { message: "query must be non-empty.".to_string() });
		}
		if query.chars().count() > MAX_QUERY_CHARS {
			return Err(Error::InvalidRequest {
				message: format!("query must be at most {MAX_QUERY_CHARS} characters."),
			});
		}

		let plan = self.plan_for(&req);

		self.orchestrator.start(query.to_string(), plan).await
	}

	fn plan_for(&self, req: &SearchRequest) -> SagaPlan {
		let settings = self.orchestrator.settings();
		let final_size = req.final_size.unwrap_or(settings.final_size).clamp(1, MAX_RESULT_LIMIT);
		let top_k = req.top_k.unwrap_or(settings.top_k).clamp(final_size, MAX_RESULT_LIMIT);

		SagaPlan {
			top_k,
			final_size,
			max_variants: settings.max_variants,
			answer: req.answer.unwrap_or(settings.answer),
		}
	}
}
