use futures::FutureExt;
use jobmail_types::{ExtractionResult, Message, TokenUsage};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::parser::parse_model_output;
use super::prompt::{extraction_schema, render_prompt, SYSTEM_PROMPT};
use super::rules::extract_with_rules;
use super::scoring::model_confidence;
use super::{Extraction, ExtractionConfig, ExtractionFailure};
use crate::llm::{CompletionRequest, LlmBackend};

/// Model-first extractor with a rule fallback
#[derive(Clone)]
pub struct ExtractionEngine {
    backend: Option<Arc<dyn LlmBackend>>,
    config: ExtractionConfig,
}

impl ExtractionEngine {
    pub fn new(backend: Option<Arc<dyn LlmBackend>>, config: ExtractionConfig) -> Self {
        Self { backend, config }
    }

    pub fn rules_only(config: ExtractionConfig) -> Self {
        Self::new(None, config)
    }

    pub fn has_model(&self) -> bool {
        self.backend.is_some()
    }

    /// Extract one message. Never fails: model problems fall back to rules and
    /// a panic anywhere inside yields an unclassified result.
    pub async fn extract(&self, message: &Message) -> Extraction {
        match AssertUnwindSafe(self.extract_inner(message))
            .catch_unwind()
            .await
        {
            Ok(extraction) => extraction,
            Err(_) => {
                tracing::error!("Extraction panicked for message {}", message.id);
                Extraction {
                    result: ExtractionResult::unclassified(),
                    usage: TokenUsage::default(),
                    llm_called: self.has_model(),
                }
            }
        }
    }

    async fn extract_inner(&self, message: &Message) -> Extraction {
        if self.backend.is_none() {
            return Extraction {
                result: extract_with_rules(message),
                usage: TokenUsage::default(),
                llm_called: false,
            };
        }

        match self.extract_with_model(message).await {
            Ok((result, usage)) => Extraction {
                result,
                usage,
                llm_called: true,
            },
            Err(failure) => {
                match &failure {
                    ExtractionFailure::Unparsable { .. } => {
                        tracing::debug!("Falling back to rules for {}: {}", message.id, failure)
                    }
                    _ => tracing::warn!("Falling back to rules for {}: {}", message.id, failure),
                }
                Extraction {
                    result: extract_with_rules(message),
                    usage: failure.usage(),
                    llm_called: true,
                }
            }
        }
    }

    /// Structured model extraction, scored
    pub async fn extract_with_model(
        &self,
        message: &Message,
    ) -> Result<(ExtractionResult, TokenUsage), ExtractionFailure> {
        let Some(backend) = &self.backend else {
            return Err(ExtractionFailure::Unparsable {
                reason: "No model configured".to_string(),
                usage: TokenUsage::default(),
            });
        };

        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: render_prompt(message, self.config.max_body_chars),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            json_schema: Some(extraction_schema()),
        };

        let completion = tokio::time::timeout(self.config.model_timeout, backend.complete(&request))
            .await
            .map_err(|_| ExtractionFailure::Timeout(self.config.model_timeout))??;

        let mut result = parse_model_output(&completion.text).map_err(|reason| {
            ExtractionFailure::Unparsable {
                reason,
                usage: completion.usage,
            }
        })?;
        result.confidence = model_confidence(&result);

        tracing::debug!(
            "{} classified {} as {} ({:.1})",
            backend.name(),
            message.id,
            result.category,
            result.confidence
        );

        Ok((result, completion.usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockBackend;
    use chrono::Utc;
    use jobmail_types::{ExtractionSource, JobCategory, Sender};
    use std::time::Duration;

    fn interview_message() -> Message {
        Message {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            subject: "Interview Invitation - Software Engineer at TechCorp".to_string(),
            sender: Sender::new(None, "hiring@techcorp.com"),
            recipient: "me@example.com".to_string(),
            received_at: Utc::now(),
            body_text: "We'd like to schedule a technical interview for next Tuesday at 2 PM."
                .to_string(),
            snippet: String::new(),
            is_unread: true,
            labels: vec!["INBOX".to_string()],
        }
    }

    fn engine(mock: &MockBackend) -> ExtractionEngine {
        let config = ExtractionConfig {
            model_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        ExtractionEngine::new(Some(Arc::new(mock.clone())), config)
    }

    const MODEL_REPLY: &str = r#"{
        "is_job_related": true,
        "category": "interview",
        "company": "TechCorp",
        "position": "Software Engineer",
        "contact_name": null,
        "contact_email": "hiring@techcorp.com",
        "key_dates": {"interview_date": "next Tuesday", "interview_time": "2 PM", "deadline": null},
        "action_required": "Confirm the interview time",
        "summary": "TechCorp wants to schedule a technical interview."
    }"#;

    #[tokio::test]
    async fn test_model_result_used_when_valid() {
        let mock = MockBackend::new(MODEL_REPLY);
        let extraction = engine(&mock).extract(&interview_message()).await;

        assert!(extraction.llm_called);
        assert_eq!(extraction.result.source, ExtractionSource::Model);
        assert_eq!(extraction.result.category, JobCategory::Interview);
        assert_eq!(extraction.result.company.as_deref(), Some("TechCorp"));
        assert!(extraction.result.confidence >= 0.6);
        assert_eq!(extraction.usage.total(), 120);

        let request = mock.last_request().unwrap();
        assert!(request.json_schema.is_some());
        assert!(request.prompt.contains("TechCorp"));
    }

    #[tokio::test]
    async fn test_falls_back_on_garbage() {
        let mock = MockBackend::new("Sorry, I can't do that.");
        let extraction = engine(&mock).extract(&interview_message()).await;

        assert!(extraction.llm_called);
        assert_eq!(extraction.result.source, ExtractionSource::Rules);
        assert_eq!(extraction.result.category, JobCategory::Interview);
        assert_eq!(extraction.result.company.as_deref(), Some("TechCorp"));
        assert!(extraction.result.confidence >= 0.6);
        // Tokens were still spent on the unusable reply
        assert_eq!(extraction.usage.total(), 120);
    }

    #[tokio::test]
    async fn test_falls_back_on_backend_error() {
        let mock = MockBackend::new(MODEL_REPLY);
        mock.push_error("connection refused");
        let extraction = engine(&mock).extract(&interview_message()).await;

        assert_eq!(extraction.result.source, ExtractionSource::Rules);
        assert_eq!(extraction.usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn test_falls_back_on_timeout() {
        let mock = MockBackend::new(MODEL_REPLY);
        mock.push_delayed(Duration::from_secs(5), MODEL_REPLY);

        let failure = engine(&mock)
            .extract_with_model(&interview_message())
            .await
            .unwrap_err();
        assert!(matches!(failure, ExtractionFailure::Timeout(_)));
    }

    #[tokio::test]
    async fn test_panic_yields_unclassified() {
        let mock = MockBackend::new(MODEL_REPLY);
        mock.push_panic("backend exploded");
        let extraction = engine(&mock).extract(&interview_message()).await;

        assert_eq!(extraction.result, ExtractionResult::unclassified());
        assert_eq!(extraction.result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_rules_only_never_calls_model() {
        let engine = ExtractionEngine::rules_only(ExtractionConfig::default());
        let extraction = engine.extract(&interview_message()).await;

        assert!(!extraction.llm_called);
        assert_eq!(extraction.result.source, ExtractionSource::Rules);
    }
}
