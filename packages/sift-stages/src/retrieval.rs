use std::collections::HashSet;

use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use sift_config::SearchProviderConfig;
use sift_domain::{
	BoxFuture, Candidate, RetrieveReply, RetrieveRequest, RetrieveStage, SourceTag,
};

use crate::{Error, Result, StageHandler};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
	pub id: String,
	pub content: String,
	#[serde(default)]
	pub score: f64,
}

/// One retrieval source. Hits come back best first.
pub trait SearchBackend
where
	Self: Send + Sync + 'static,
{
	fn search<'a>(&'a self, query: &'a str, limit: u32) -> BoxFuture<'a, Result<Vec<SearchHit>>>;
}

pub struct HttpSearchBackend {
	client: Client,
	cfg: SearchProviderConfig,
}
impl HttpSearchBackend {
	pub fn new(cfg: &SearchProviderConfig) -> Result<Self> {
		Ok(Self { client: crate::http_client(cfg.timeout_ms)?, cfg: cfg.clone() })
	}

	async fn query(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>> {
		let url = format!("{}{}", self.cfg.api_base, self.cfg.path);
		let body = serde_json::json!({ "index": self.cfg.index, "query": query, "limit": limit });
		let res = self
			.client
			.post(url)
			.headers(crate::auth_headers(self.cfg.api_key.as_deref(), &self.cfg.default_headers)?)
			.json(&body)
			.send()
			.await?;
		let json: Value = res.error_for_status()?.json().await?;

		parse_search_response(json)
	}
}
impl SearchBackend for HttpSearchBackend {
	fn search<'a>(&'a self, query: &'a str, limit: u32) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
		Box::pin(self.query(query, limit))
	}
}

/// Queries the dense and the sparse source side by side for every query variant.
pub struct HybridRetriever<B> {
	dense: B,
	sparse: B,
}
impl<B> HybridRetriever<B>
where
	B: SearchBackend,
{
	pub fn new(dense: B, sparse: B) -> Self {
		Self { dense, sparse }
	}

	pub async fn retrieve(&self, request: RetrieveRequest) -> Result<RetrieveReply> {
		let variants = if request.variants.is_empty() {
			vec![request.query.clone()]
		} else {
			request.variants.clone()
		};
		let (dense, sparse) = tokio::join!(
			collect_source(&self.dense, SourceTag::Dense, &variants, request.top_k),
			collect_source(&self.sparse, SourceTag::Sparse, &variants, request.top_k),
		);
		let mut reply = RetrieveReply::default();

		for (source, hits) in [(SourceTag::Dense, dense), (SourceTag::Sparse, sparse)] {
			match hits {
				Some(hits) => reply.candidates.extend(hits.into_iter().map(|hit| Candidate {
					id: hit.id,
					content: hit.content,
					score: hit.score,
					source,
				})),
				None => reply.failed_sources.push(source),
			}
		}

		Ok(reply)
	}
}
impl<B> StageHandler for HybridRetriever<B>
where
	B: SearchBackend,
{
	type Kind = RetrieveStage;

	fn handle<'a>(&'a self, request: RetrieveRequest) -> BoxFuture<'a, Result<RetrieveReply>> {
		Box::pin(self.retrieve(request))
	}
}

/// Runs every variant against one source concurrently. `None` means every variant failed.
async fn collect_source<B>(
	backend: &B,
	source: SourceTag,
	variants: &[String],
	top_k: u32,
) -> Option<Vec<SearchHit>>
where
	B: SearchBackend,
{
	let results = join_all(variants.iter().map(|variant| backend.search(variant, top_k))).await;
	let mut lists = Vec::with_capacity(results.len());

	for result in results {
		match result {
			Ok(hits) => lists.push(hits),
			Err(err) => {
				tracing::warn!(source = %source, error = %err, "Retrieval source query failed.");
			},
		}
	}

	if lists.is_empty() {
		return None;
	}

	Some(interleave(lists, top_k as usize))
}

/// Round-robin by rank across the variant lists, keeping the first occurrence of each id.
pub fn interleave(lists: Vec<Vec<SearchHit>>, limit: usize) -> Vec<SearchHit> {
	let depth = lists.iter().map(Vec::len).max().unwrap_or(0);
	let mut out = Vec::new();
	let mut seen = HashSet::new();

	for rank in 0..depth {
		for list in &lists {
			if out.len() >= limit {
				return out;
			}

			let Some(hit) = list.get(rank) else {
				continue;
			};

			if seen.insert(hit.id.clone()) {
				out.push(hit.clone());
			}
		}
	}

	out
}

fn parse_search_response(json: Value) -> Result<Vec<SearchHit>> {
	let hits = json
		.get("hits")
		.or_else(|| json.get("results"))
		.cloned()
		.ok_or_else(|| Error::invalid_response("Search response is missing hits array."))?;

	Ok(serde_json::from_value(hits)?)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn hit(id: &str) -> SearchHit {
		SearchHit { id: id.to_string(), content: format!("{id} body"), score: 1.0 }
	}

	fn ids(hits: &[SearchHit]) -> Vec<&str> {
		hits.iter().map(|hit| hit.id.as_str()).collect()
	}

	/// Every query parks on a barrier sized to the variant count, so it only completes when
	/// all variants are in flight together.
	struct BarrierBackend {
		barrier: tokio::sync::Barrier,
	}
	impl SearchBackend for BarrierBackend {
		fn search<'a>(
			&'a self,
			query: &'a str,
			_limit: u32,
		) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
			Box::pin(async move {
				self.barrier.wait().await;

				Ok(vec![hit(query)])
			})
		}
	}

	#[tokio::test]
	async fn variants_are_queried_concurrently() {
		let variants = vec!["v1".to_string(), "v2".to_string(), "v3".to_string()];
		let retriever = HybridRetriever::new(
			BarrierBackend { barrier: tokio::sync::Barrier::new(variants.len()) },
			BarrierBackend { barrier: tokio::sync::Barrier::new(variants.len()) },
		);
		let reply = tokio::time::timeout(
			std::time::Duration::from_secs(1),
			retriever.retrieve(RetrieveRequest {
				query: "q".to_string(),
				variants,
				top_k: 10,
			}),
		)
		.await
		.expect("Variants were queried one at a time.")
		.expect("Retrieval failed.");
		let dense: Vec<&str> = reply
			.candidates
			.iter()
			.filter(|candidate| candidate.source == SourceTag::Dense)
			.map(|candidate| candidate.id.as_str())
			.collect();

		assert_eq!(dense, vec!["v1", "v2", "v3"]);
		assert!(reply.failed_sources.is_empty());
	}

	#[test]
	fn interleaves_variants_by_rank() {
		let merged = interleave(
			vec![vec![hit("a"), hit("b"), hit("c")], vec![hit("b"), hit("d")]],
			10,
		);

		assert_eq!(ids(&merged), vec!["a", "b", "d", "c"]);
	}

	#[test]
	fn interleave_stops_at_limit() {
		let merged = interleave(vec![vec![hit("a"), hit("b")], vec![hit("c"), hit("d")]], 3);

		assert_eq!(ids(&merged), vec!["a", "c", "b"]);
	}

	#[test]
	fn parses_hits_with_default_score() {
		let json = serde_json::json!({
			"hits": [
				{ "id": "d1", "content": "first", "score": 0.7 },
				{ "id": "d2", "content": "second" }
			]
		});
		let hits = parse_search_response(json).expect("parse failed");

		assert_eq!(hits.len(), 2);
		assert_eq!(hits[1].score, 0.0);
	}

	#[test]
	fn missing_hits_is_invalid() {
		let err = parse_search_response(serde_json::json!({ "took": 3 })).expect_err("Expected error.");

		assert!(matches!(err, Error::InvalidResponse { .. }));
	}
}
