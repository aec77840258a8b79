//! LLM provider abstraction.
//!
//! One capability — `complete(prompt, deadline) -> text` — with a variant per
//! backend shape. The OpenAI-compatible variant also serves `groq`, `gemini`,
//! and `claude`, which differ only in base URL/model defaults, not in wire
//! shape or retry policy.

mod local;
mod openai;

use std::time::Duration;

use thiserror::Error;

use crate::config::{AiProvider, ProviderConfig};

pub use local::LocalProvider;
pub use openai::OpenAiCompatibleProvider;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider rejected request: {status} {body}")]
    Rejected { status: u16, body: String },
    #[error("provider returned empty completion")]
    Empty,
    #[error("provider call exceeded its deadline")]
    Timeout,
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
            || matches!(self, ProviderError::Rejected { status, .. } if *status >= 500)
    }
}

/// A pluggable completion backend. Implementors hold no cross-call state.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, prompt: &str, deadline: Duration) -> Result<String, ProviderError>;
}

/// Construct the configured provider variant.
pub fn build_provider(config: &ProviderConfig) -> Box<dyn Provider> {
    match config.provider {
        AiProvider::Local => Box::new(LocalProvider::new(config.base_url.clone(), config.model.clone())),
        AiProvider::OpenAi | AiProvider::Groq | AiProvider::Gemini | AiProvider::Claude => {
            Box::new(OpenAiCompatibleProvider::new(
                config.base_url.clone(),
                config.model.clone(),
                config.api_key.clone().unwrap_or_default(),
            ))
        }
    }
}
