//! Stage workers for the search pipeline.
//!
//! Each worker consumes one stage's request channel and publishes exactly one reply per request.
//! The handlers here talk to the external collaborators over HTTP.

pub mod answer;
pub mod expansion;
pub mod rerank;
pub mod retrieval;
pub mod worker;

mod error;

pub use answer::AnswerGenerator;
pub use error::{Error, Result};
pub use expansion::QueryExpander;
pub use rerank::Reranker;
pub use retrieval::{HttpSearchBackend, HybridRetriever, SearchBackend};
pub use worker::{StageHandler, run_stage_worker, spawn_stage_worker};

use std::time::Duration;

use reqwest::{
	Client,
	header::{AUTHORIZATION, HeaderMap, HeaderName},
};
use serde_json::{Map, Value};

/// Builds request headers. Backends without a key skip the `Authorization` header.
pub fn auth_headers(api_key: Option<&str>, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	if let Some(api_key) = api_key {
		headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);
	}

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::NonStringHeader { name: key.clone() });
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

pub(crate) fn http_client(timeout_ms: u64) -> Result<Client> {
	Ok(Client::builder().timeout(Duration::from_millis(timeout_ms)).build()?)
}

/// Returns the first choice's message content from a chat completion response.
pub(crate) fn chat_content(json: &Value) -> Result<&str> {
	json.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.ok_or_else(|| Error::invalid_response("Chat completion is missing message content."))
}
