//! LLM — OpenAI-compatible gateway adapter for persona-flavoured chat.
//!
//! DESIGN
//! ======
//! Configured from environment variables. `LlmClient` wraps one
//! chat-completions client and a model name; callers depend on the
//! `LlmChat` trait so tests can substitute a mock.

pub mod config;
pub mod openai;
pub mod types;

use config::LlmConfig;
pub use types::LlmChat;
use types::{ChatResponse, LlmError, Message, Sampling};

// =============================================================================
// CLIENT
// =============================================================================

pub struct LlmClient {
    inner: openai::OpenAiClient,
    model: String,
}

impl LlmClient {
    /// Build an LLM client from a parsed typed config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn from_config(config: LlmConfig) -> Result<Self, LlmError> {
        let inner = openai::OpenAiClient::new(config.api_key, config.base_url, config.timeouts)?;
        Ok(Self { inner, model: config.model })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl LlmChat for LlmClient {
    async fn chat(&self, sampling: &Sampling, system: &str, messages: &[Message]) -> Result<ChatResponse, LlmError> {
        self.inner
            .chat(&self.model, sampling, system, messages)
            .await
    }
}
