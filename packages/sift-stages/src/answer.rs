use reqwest::Client;
use serde_json::Value;

use sift_config::LlmProviderConfig;
use sift_domain::{AnswerReply, AnswerRequest, AnswerStage, BoxFuture, RankedResult};

use crate::{Error, Result, StageHandler};

/// Writes a short answer grounded in the ranked results.
pub struct AnswerGenerator {
	client: Client,
	cfg: LlmProviderConfig,
}
impl AnswerGenerator {
	pub fn new(cfg: &LlmProviderConfig) -> Result<Self> {
		Ok(Self { client: crate::http_client(cfg.timeout_ms)?, cfg: cfg.clone() })
	}

	pub async fn answer(&self, request: AnswerRequest) -> Result<AnswerReply> {
		let url = format!("{}{}", self.cfg.api_base, self.cfg.path);
		let body = serde_json::json!({
			"model": self.cfg.model,
			"temperature": self.cfg.temperature,
			"messages": build_answer_messages(&request.query, &request.context),
		});
		let res = self
			.client
			.post(url)
			.headers(crate::auth_headers(Some(&self.cfg.api_key), &self.cfg.default_headers)?)
			.json(&body)
			.send()
			.await?;
		let json: Value = res.error_for_status()?.json().await?;
		let answer = crate::chat_content(&json)?.trim();

		if answer.is_empty() {
			return Err(Error::invalid_response("Answer model returned empty content."));
		}

		Ok(AnswerReply { answer: answer.to_string() })
	}
}
impl StageHandler for AnswerGenerator {
	type Kind = AnswerStage;

	fn handle<'a>(&'a self, request: AnswerRequest) -> BoxFuture<'a, Result<AnswerReply>> {
		Box::pin(self.answer(request))
	}
}

fn build_answer_messages(query: &str, context: &[RankedResult]) -> Vec<Value> {
	let system_prompt = "You answer questions using only the numbered sources provided. \
Cite sources as [n]. If the sources do not contain the answer, say so briefly.";
	let sources = context
		.iter()
		.enumerate()
		.map(|(idx, result)| format!("[{}] {}", idx + 1, result.content))
		.collect::<Vec<_>>()
		.join("\n\n");
	let user_prompt = format!("Sources:\n{sources}\n\nQuestion:\n{query}");

	vec![
		serde_json::json!({ "role": "system", "content": system_prompt }),
		serde_json::json!({ "role": "user", "content": user_prompt }),
	]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn numbers_sources_in_rank_order() {
		let context = vec![
			RankedResult { id: "d2".to_string(), content: "Sagas coordinate.".to_string(), score: 0.9 },
			RankedResult { id: "d1".to_string(), content: "RRF fuses.".to_string(), score: 0.4 },
		];
		let messages = build_answer_messages("how?", &context);
		let user = messages[1]["content"].as_str().expect("user content");

		assert!(user.starts_with("Sources:\n[1] Sagas coordinate.\n\n[2] RRF fuses."));
		assert!(user.ends_with("Question:\nhow?"));
	}
}
