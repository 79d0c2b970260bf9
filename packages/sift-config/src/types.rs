use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	#[serde(default)]
	pub bus: Bus,
	pub pipeline: Pipeline,
	pub expansion: Expansion,
	pub providers: Providers,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Bus {
	/// Bounded capacity of every request and reply channel.
	pub channel_capacity: usize,
	/// Maximum requests each stage worker handles at once.
	pub worker_concurrency: usize,
}
impl Default for Bus {
	fn default() -> Self {
		Self { channel_capacity: 1_024, worker_concurrency: 32 }
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
	/// Candidates requested from retrieval and kept after fusion.
	pub top_k: u32,
	/// Results returned to the caller.
	pub final_size: u32,
	/// Whether searches run the answer stage unless the request says otherwise.
	#[serde(default)]
	pub answer: bool,
	pub timeouts: StageTimeouts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageTimeouts {
	pub expand_ms: u64,
	pub retrieve_ms: u64,
	pub rank_ms: u64,
	#[serde(default = "default_answer_timeout_ms")]
	pub answer_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Expansion {
	pub max_queries: u32,
	pub include_original: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub expansion: LlmProviderConfig,
	pub dense: SearchProviderConfig,
	pub sparse: SearchProviderConfig,
	pub rerank: ProviderConfig,
	pub answer: LlmProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

/// One half of the hybrid retrieval backend. Both halves accept the same request shape.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchProviderConfig {
	pub api_base: String,
	/// Optional. Blank keys are treated as absent.
	pub api_key: Option<String>,
	pub path: String,
	pub index: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

fn default_answer_timeout_ms() -> u64 {
	5_000
}
