use reqwest::Client;
use serde_json::Value;

use sift_config::ProviderConfig;
use sift_domain::{BoxFuture, RankReply, RankRequest, RankStage, RankedResult};

use crate::{Error, Result, StageHandler};

pub struct Reranker {
	client: Client,
	cfg: ProviderConfig,
}
impl Reranker {
	pub fn new(cfg: &ProviderConfig) -> Result<Self> {
		Ok(Self { client: crate::http_client(cfg.timeout_ms)?, cfg: cfg.clone() })
	}

	pub async fn rank(&self, request: RankRequest) -> Result<RankReply> {
		if request.candidates.is_empty() {
			return Ok(RankReply { ranked: Vec::new() });
		}

		let docs: Vec<&str> =
			request.candidates.iter().map(|candidate| candidate.content.as_str()).collect();
		let url = format!("{}{}", self.cfg.api_base, self.cfg.path);
		let body =
			serde_json::json!({ "model": self.cfg.model, "query": request.query, "documents": docs });
		let res = self
			.client
			.post(url)
			.headers(crate::auth_headers(Some(&self.cfg.api_key), &self.cfg.default_headers)?)
			.json(&body)
			.send()
			.await?;
		let json: Value = res.error_for_status()?.json().await?;
		let scores = parse_rerank_response(json, docs.len())?;

		Ok(RankReply { ranked: order_by_scores(&request, &scores) })
	}
}
impl StageHandler for Reranker {
	type Kind = RankStage;

	fn handle<'a>(&'a self, request: RankRequest) -> BoxFuture<'a, Result<RankReply>> {
		Box::pin(self.rank(request))
	}
}

/// Candidates sorted by score descending. Equal scores keep candidate order.
fn order_by_scores(request: &RankRequest, scores: &[f64]) -> Vec<RankedResult> {
	let mut ranked: Vec<RankedResult> = request
		.candidates
		.iter()
		.zip(scores)
		.map(|(candidate, score)| RankedResult {
			id: candidate.id.clone(),
			content: candidate.content.clone(),
			score: *score,
		})
		.collect();

	ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

	ranked
}

fn parse_rerank_response(json: Value, doc_count: usize) -> Result<Vec<f64>> {
	let mut scores = vec![0.0; doc_count];
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::invalid_response("Rerank response is missing results array."))?;

	for item in results {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.ok_or_else(|| Error::invalid_response("Rerank result missing index."))? as usize;
		let score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| Error::invalid_response("Rerank result missing score."))?;

		if let Some(slot) = scores.get_mut(index) {
			*slot = score;
		}
	}

	Ok(scores)
}

#[cfg(test)]
mod tests {
	use sift_domain::{Candidate, SourceTag};

	use super::*;

	#[test]
	fn aligns_scores_by_index() {
		let json = serde_json::json!({
			"results": [
				{ "index": 1, "relevance_score": 0.2 },
				{ "index": 0, "relevance_score": 0.9 },
				{ "index": 7, "relevance_score": 0.5 }
			]
		});
		let scores = parse_rerank_response(json, 2).expect("parse failed");

		assert_eq!(scores, vec![0.9, 0.2]);
	}

	#[test]
	fn orders_by_score_and_keeps_ties_stable() {
		let request = RankRequest {
			query: "q".to_string(),
			candidates: ["a", "b", "c"]
				.into_iter()
				.map(|id| Candidate {
					id: id.to_string(),
					content: id.to_string(),
					score: 0.0,
					source: SourceTag::Fused,
				})
				.collect(),
		};
		let ranked = order_by_scores(&request, &[0.5, 0.9, 0.5]);
		let ids: Vec<&str> = ranked.iter().map(|result| result.id.as_str()).collect();

		assert_eq!(ids, vec!["b", "a", "c"]);
	}
}
