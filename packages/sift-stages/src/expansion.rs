use std::collections::HashSet;

use reqwest::Client;
use serde_json::Value;

use sift_config::{Expansion, LlmProviderConfig};
use sift_domain::{BoxFuture, ExpandReply, ExpandRequest, ExpandStage};

use crate::{Error, Result, StageHandler};

const MAX_ATTEMPTS: usize = 3;

/// Rewrites a query into search variants with a chat-completion model.
pub struct QueryExpander {
	client: Client,
	cfg: LlmProviderConfig,
	include_original: bool,
}
impl QueryExpander {
	pub fn new(cfg: &LlmProviderConfig, expansion: &Expansion) -> Result<Self> {
		Ok(Self {
			client: crate::http_client(cfg.timeout_ms)?,
			cfg: cfg.clone(),
			include_original: expansion.include_original,
		})
	}

	pub async fn expand(&self, request: ExpandRequest) -> Result<ExpandReply> {
		let url = format!("{}{}", self.cfg.api_base, self.cfg.path);
		let messages =
			build_expansion_messages(&request.query, request.max_variants, self.include_original);
		let body = serde_json::json!({
			"model": self.cfg.model,
			"temperature": self.cfg.temperature,
			"messages": messages,
		});
		let headers = crate::auth_headers(Some(&self.cfg.api_key), &self.cfg.default_headers)?;
		let mut last_err = Error::invalid_response("Expansion produced no attempts.");

		// Malformed output is resampled up to MAX_ATTEMPTS times.
		for _ in 0..MAX_ATTEMPTS {
			let res = self.client.post(&url).headers(headers.clone()).json(&body).send().await?;
			let json: Value = res.error_for_status()?.json().await?;

			match parse_expansion_response(&json) {
				Ok(queries) => {
					let variants = normalize_queries(
						queries,
						&request.query,
						self.include_original,
						request.max_variants,
					);

					return Ok(ExpandReply { variants });
				},
				Err(err) => last_err = err,
			}
		}

		Err(last_err)
	}
}
impl StageHandler for QueryExpander {
	type Kind = ExpandStage;

	fn handle<'a>(&'a self, request: ExpandRequest) -> BoxFuture<'a, Result<ExpandReply>> {
		Box::pin(self.expand(request))
	}
}

fn build_expansion_messages(query: &str, max_variants: u32, include_original: bool) -> Vec<Value> {
	let system_prompt = "You are a query expansion engine for a hybrid search system. \
Output must be valid JSON only and must match the provided schema exactly. \
Generate short query variations that preserve the original intent. \
Do not add explanations or extra fields.";
	let user_prompt = format!(
		"Return JSON matching this exact schema:\n{{\"queries\": [\"string\"]}}\nConstraints:\n- MAX_QUERIES = {max_variants}\n- INCLUDE_ORIGINAL = {include_original}\nOriginal query:\n{query}"
	);

	vec![
		serde_json::json!({ "role": "system", "content": system_prompt }),
		serde_json::json!({ "role": "user", "content": user_prompt }),
	]
}

fn parse_expansion_response(json: &Value) -> Result<Vec<String>> {
	let parsed: Value = serde_json::from_str(crate::chat_content(json)?)?;
	let queries = parsed
		.get("queries")
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::invalid_response("Expansion output is missing queries array."))?;

	Ok(queries.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
}

/// Trims, drops blanks, dedupes case-insensitively, and caps at `max_variants`. The original
/// query leads when `include_original` is set.
pub fn normalize_queries(
	queries: Vec<String>,
	original: &str,
	include_original: bool,
	max_variants: u32,
) -> Vec<String> {
	let cap = max_variants.max(1) as usize;
	let mut out = Vec::new();
	let mut seen = HashSet::new();
	let leading = include_original.then_some(original.to_string());

	for query in leading.into_iter().chain(queries) {
		if out.len() >= cap {
			break;
		}

		let trimmed = query.trim();

		if !trimmed.is_empty() && seen.insert(trimmed.to_lowercase()) {
			out.push(trimmed.to_string());
		}
	}

	out
}
