//! LLM configuration parsed from environment variables.

use super::types::{LlmError, Sampling};
use crate::config::env_parse;

pub const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "google/gemma-2-9b-it:free";
pub const DEFAULT_LLM_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_LLM_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlmTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub sampling: Sampling,
    pub timeouts: LlmTimeouts,
}

impl LlmConfig {
    /// Build typed LLM config from environment variables.
    ///
    /// - `LLM_API_KEY_ENV`: names the env var holding the key (default `OPENROUTER_API_KEY`)
    /// - `LLM_MODEL`: default `google/gemma-2-9b-it:free`
    /// - `LLM_BASE_URL`: OpenAI-compatible gateway, default OpenRouter
    /// - `AI_MAX_TOKENS`, `AI_TEMPERATURE`, `AI_TOP_P`: sampling (500 / 0.7 / 0.9)
    /// - `LLM_REQUEST_TIMEOUT_SECS`: default 120
    /// - `LLM_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns an error if the key variable is unset or a sampling value is
    /// out of range.
    pub fn from_env() -> Result<Self, LlmError> {
        let key_var = std::env::var("LLM_API_KEY_ENV").unwrap_or_else(|_| DEFAULT_API_KEY_ENV.to_string());
        let api_key = std::env::var(&key_var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(LlmError::MissingApiKey { var: key_var })?;

        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let defaults = Sampling::default();
        let sampling = validate_sampling(Sampling {
            max_tokens: env_parse("AI_MAX_TOKENS", defaults.max_tokens),
            temperature: env_parse("AI_TEMPERATURE", defaults.temperature),
            top_p: env_parse("AI_TOP_P", defaults.top_p),
        })?;
        let timeouts = LlmTimeouts {
            request_secs: env_parse("LLM_REQUEST_TIMEOUT_SECS", DEFAULT_LLM_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse("LLM_CONNECT_TIMEOUT_SECS", DEFAULT_LLM_CONNECT_TIMEOUT_SECS),
        };

        Ok(Self { api_key, model, base_url, sampling, timeouts })
    }
}

fn validate_sampling(sampling: Sampling) -> Result<Sampling, LlmError> {
    if sampling.max_tokens == 0 {
        return Err(LlmError::ConfigParse("AI_MAX_TOKENS must be positive".into()));
    }
    if !(0.0..=2.0).contains(&sampling.temperature) {
        return Err(LlmError::ConfigParse(format!(
            "AI_TEMPERATURE {} outside 0.0..=2.0",
            sampling.temperature
        )));
    }
    if !(sampling.top_p > 0.0 && sampling.top_p <= 1.0) {
        return Err(LlmError::ConfigParse(format!("AI_TOP_P {} outside (0.0, 1.0]", sampling.top_p)));
    }
    Ok(sampling)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
