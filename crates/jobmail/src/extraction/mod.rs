//! Job-search fact extraction.
//!
//! Two stages: a schema-constrained model call, and a deterministic rule pass
//! used whenever the model stage fails or no model is configured.

use jobmail_types::{ExtractionResult, TokenUsage};
use std::time::Duration;
use thiserror::Error;

use crate::config::env_parse;
use crate::llm::LlmError;

mod engine;
pub mod parser;
pub mod prompt;
pub mod rules;
pub mod scoring;

pub use engine::ExtractionEngine;
pub use rules::extract_with_rules;

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Body is cut to this many chars before prompting
    pub max_body_chars: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound on one model extraction, retries included
    pub model_timeout: Duration,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_body_chars: 4000,
            max_tokens: 600,
            temperature: 0.1,
            model_timeout: Duration::from_secs(60),
        }
    }
}

impl ExtractionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_body_chars: env_parse("EXTRACTION_MAX_BODY_CHARS", defaults.max_body_chars),
            max_tokens: env_parse("EXTRACTION_MAX_TOKENS", defaults.max_tokens),
            temperature: env_parse("EXTRACTION_TEMPERATURE", defaults.temperature),
            model_timeout: Duration::from_secs(env_parse(
                "EXTRACTION_TIMEOUT_SECS",
                defaults.model_timeout.as_secs(),
            )),
        }
    }
}

/// Why the model stage produced nothing usable
#[derive(Debug, Error)]
pub enum ExtractionFailure {
    #[error("Model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unparsable model output: {reason}")]
    Unparsable { reason: String, usage: TokenUsage },
}

impl ExtractionFailure {
    /// Tokens spent before the failure, if a response came back
    pub fn usage(&self) -> TokenUsage {
        match self {
            ExtractionFailure::Unparsable { usage, .. } => *usage,
            _ => TokenUsage::default(),
        }
    }
}

/// Outcome of extracting one message
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub result: ExtractionResult,
    pub usage: TokenUsage,
    /// Whether a model call was attempted
    pub llm_called: bool,
}
