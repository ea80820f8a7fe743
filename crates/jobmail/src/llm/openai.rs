//! OpenAI-compatible `/chat/completions` client.
//!
//! OpenAI, Groq and LM Studio all speak this protocol; they differ in base
//! URL, whether a key is needed, and which `response_format` they accept.

use async_trait::async_trait;
use jobmail_types::TokenUsage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::{Completion, CompletionRequest, LlmBackend, LlmConfig, LlmError};

/// First retry delay; doubles on each attempt
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Delay before retry number `attempt + 1`; saturates for large attempt counts
fn backoff_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt))
}

pub struct OpenAiCompatible {
    config: LlmConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAiCompatible {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Communication(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn response_format(&self, schema: Option<&Value>) -> Option<Value> {
        let schema = schema?;
        if self.config.provider.supports_json_schema() {
            Some(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "extraction",
                    "strict": true,
                    "schema": schema,
                }
            }))
        } else {
            Some(json!({ "type": "json_object" }))
        }
    }

    async fn send_once(&self, body: &ChatRequest<'_>) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;
        parse_completion(parsed)
    }
}

fn parse_completion(response: ChatResponse) -> Result<Completion, LlmError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| LlmError::InvalidResponse("Response has no message content".to_string()))?;

    let usage = response
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(Completion { text, usage })
}

#[async_trait]
impl LlmBackend for OpenAiCompatible {
    fn name(&self) -> &str {
        self.config.provider.as_str()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: self.response_format(request.json_schema.as_ref()),
        };

        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() && attempt + 1 < self.config.max_retries => {
                    let delay = backoff_delay(attempt);
                    tracing::debug!(
                        "{} completion failed ({}); retrying in {:?}",
                        self.name(),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmProvider;

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay(0), RETRY_BASE_DELAY);
        assert_eq!(backoff_delay(3), RETRY_BASE_DELAY * 8);
        // LLM_MAX_RETRIES has no upper bound
        assert_eq!(
            backoff_delay(40),
            RETRY_BASE_DELAY.saturating_mul(u32::MAX)
        );
        assert!(backoff_delay(u32::MAX) >= backoff_delay(40));
    }

    #[test]
    fn test_response_format_per_provider() {
        let schema = json!({ "type": "object" });

        let openai = OpenAiCompatible::new(LlmConfig::new(LlmProvider::OpenAi)).unwrap();
        let format = openai.response_format(Some(&schema)).unwrap();
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["strict"], true);

        let groq = OpenAiCompatible::new(LlmConfig::new(LlmProvider::Groq)).unwrap();
        assert_eq!(groq.response_format(Some(&schema)).unwrap()["type"], "json_object");

        assert!(openai.response_format(None).is_none());
    }

    #[test]
    fn test_parse_completion() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"ok\":true}" } }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150 }
        }))
        .unwrap();

        let completion = parse_completion(response).unwrap();
        assert_eq!(completion.text, "{\"ok\":true}");
        assert_eq!(completion.usage.total(), 150);
    }

    #[test]
    fn test_parse_completion_without_choices() {
        let response: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(matches!(
            parse_completion(response),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_request_omits_missing_response_format() {
        let body = ChatRequest {
            model: "m",
            messages: vec![],
            max_tokens: 10,
            temperature: 0.0,
            response_format: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("response_format").is_none());
    }
}
