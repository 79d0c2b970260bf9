mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Bus, Config, Expansion, LlmProviderConfig, Pipeline, ProviderConfig, Providers,
	SearchProviderConfig, Service, StageTimeouts,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn from_toml_str(raw: &str) -> Result<Config> {
	let mut cfg: Config = toml::from_str(raw).map_err(|err| Error::ParseText { source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.bus.channel_capacity == 0 {
		return Err(Error::Validation {
			message: "bus.channel_capacity must be greater than zero.".to_string(),
		});
	}
	if cfg.bus.worker_concurrency == 0 {
		return Err(Error::Validation {
			message: "bus.worker_concurrency must be greater than zero.".to_string(),
		});
	}
	if cfg.pipeline.final_size == 0 {
		return Err(Error::Validation {
			message: "pipeline.final_size must be greater than zero.".to_string(),
		});
	}
	if cfg.pipeline.top_k < cfg.pipeline.final_size {
		return Err(Error::Validation {
			message: "pipeline.top_k must be at least pipeline.final_size.".to_string(),
		});
	}

	for (label, value) in [
		("pipeline.timeouts.expand_ms", cfg.pipeline.timeouts.expand_ms),
		("pipeline.timeouts.retrieve_ms", cfg.pipeline.timeouts.retrieve_ms),
		("pipeline.timeouts.rank_ms", cfg.pipeline.timeouts.rank_ms),
		("pipeline.timeouts.answer_ms", cfg.pipeline.timeouts.answer_ms),
	] {
		if value == 0 {
			return Err(Error::Validation { message: format!("{label} must be greater than zero.") });
		}
	}

	if cfg.expansion.max_queries == 0 {
		return Err(Error::Validation {
			message: "expansion.max_queries must be greater than zero.".to_string(),
		});
	}

	for (label, key) in [
		("expansion", &cfg.providers.expansion.api_key),
		("rerank", &cfg.providers.rerank.api_key),
		("answer", &cfg.providers.answer.api_key),
	] {
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}
	for (label, temperature) in [
		("expansion", cfg.providers.expansion.temperature),
		("answer", cfg.providers.answer.temperature),
	] {
		if !temperature.is_finite() {
			return Err(Error::Validation {
				message: format!("Provider {label} temperature must be a finite number."),
			});
		}
	}
	for (label, search) in [("dense", &cfg.providers.dense), ("sparse", &cfg.providers.sparse)] {
		if search.index.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} index must be non-empty."),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	for search in [&mut cfg.providers.dense, &mut cfg.providers.sparse] {
		if search.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false) {
			search.api_key = None;
		}
	}
}
