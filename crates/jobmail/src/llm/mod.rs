//! Language model backends.
//!
//! Every backend implements one operation: complete a prompt, optionally
//! constrained by a JSON schema. Cloud and local servers are interchangeable.

use anyhow::{bail, Result};
use async_trait::async_trait;
use jobmail_types::TokenUsage;
use serde_json::Value;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::env_parse;

#[cfg(test)]
mod mock;
mod openai;

#[cfg(test)]
pub(crate) use mock::MockBackend;
pub use openai::OpenAiCompatible;

/// Default timeout for one HTTP completion call
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of attempts for retryable failures
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Error, Debug)]
pub enum LlmError {
    /// Network failure before a response arrived
    #[error("Communication error: {0}")]
    Communication(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    /// Response arrived but did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Communication(_) | LlmError::Timeout => true,
            LlmError::Status { status, .. } => *status == 429 || *status >= 500,
            LlmError::InvalidResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Communication(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// JSON schema the output must follow, when the backend can enforce one
    pub json_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Groq,
    LmStudio,
}

impl LlmProvider {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "groq" => Some(LlmProvider::Groq),
            "lmstudio" | "lm-studio" | "local" => Some(LlmProvider::LmStudio),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Groq => "groq",
            LlmProvider::LmStudio => "lmstudio",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Groq => "https://api.groq.com/openai/v1",
            LlmProvider::LmStudio => "http://localhost:1234/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4o-mini",
            LlmProvider::Groq => "llama-3.1-8b-instant",
            LlmProvider::LmStudio => "local-model",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, LlmProvider::LmStudio)
    }

    /// Groq accepts `json_object` but not strict `json_schema`
    pub fn supports_json_schema(&self) -> bool {
        !matches!(self, LlmProvider::Groq)
    }
}

#[derive(Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl LlmConfig {
    pub fn new(provider: LlmProvider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            api_key: None,
            base_url: provider.default_base_url().to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// `None` when `LLM_PROVIDER` is unset or `none`: extraction then runs on
    /// rules alone.
    pub fn from_env() -> Result<Option<Self>> {
        let raw = env::var("LLM_PROVIDER").unwrap_or_default();
        if raw.trim().is_empty() || raw.trim().eq_ignore_ascii_case("none") {
            return Ok(None);
        }

        let Some(provider) = LlmProvider::parse(&raw) else {
            bail!("Unknown LLM_PROVIDER '{}' (expected openai, groq, lmstudio or none)", raw);
        };

        let mut config = Self::new(provider);
        if let Ok(model) = env::var("LLM_MODEL") {
            config.model = model;
        }
        if let Ok(base_url) = env::var("LLM_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        config.api_key = env::var("LLM_API_KEY").ok().filter(|k| !k.trim().is_empty());
        config.timeout = Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS));
        config.max_retries = env_parse("LLM_MAX_RETRIES", DEFAULT_MAX_RETRIES).max(1);

        if provider.requires_api_key() && config.api_key.is_none() {
            bail!("LLM_API_KEY must be set for provider {}", provider.as_str());
        }

        Ok(Some(config))
    }
}

/// Build the backend for a configured provider
pub fn build_backend(config: &LlmConfig) -> Result<Arc<dyn LlmBackend>> {
    let backend = OpenAiCompatible::new(config.clone())?;
    tracing::info!(
        "Using {} model {} at {}",
        config.provider.as_str(),
        config.model,
        config.base_url
    );
    Ok(Arc::new(backend))
}
