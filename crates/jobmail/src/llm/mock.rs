//! Scripted backend for extraction tests.

use async_trait::async_trait;
use jobmail_types::TokenUsage;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{Completion, CompletionRequest, LlmBackend, LlmError};

#[derive(Debug, Clone)]
enum Reply {
    Error(String),
    Delayed(Duration, String),
    Panic(String),
}

/// Plays queued failures in order, otherwise answers with the fixed reply.
///
/// Clones share the same script.
#[derive(Debug, Clone)]
pub struct MockBackend {
    reply: String,
    script: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockBackend {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Next call fails with a communication error
    pub fn push_error(&self, message: impl Into<String>) {
        lock(&self.script).push_back(Reply::Error(message.into()));
    }

    /// Next call sleeps before answering
    pub fn push_delayed(&self, delay: Duration, response: impl Into<String>) {
        lock(&self.script).push_back(Reply::Delayed(delay, response.into()));
    }

    pub fn push_panic(&self, message: impl Into<String>) {
        lock(&self.script).push_back(Reply::Panic(message.into()));
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        lock(&self.requests).last().cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        lock(&self.requests).push(request.clone());

        let next = lock(&self.script).pop_front();
        let text = match next {
            None => self.reply.clone(),
            Some(Reply::Error(message)) => return Err(LlmError::Communication(message)),
            Some(Reply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                text
            }
            Some(Reply::Panic(message)) => panic!("{}", message),
        };

        Ok(Completion {
            text,
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            system: "sys".to_string(),
            prompt: prompt.to_string(),
            max_tokens: 10,
            temperature: 0.0,
            json_schema: None,
        }
    }

    #[tokio::test]
    async fn test_script_then_reply() {
        let mock = MockBackend::new("reply");
        mock.push_error("boom");

        assert!(mock.complete(&request("first")).await.is_err());
        assert_eq!(mock.complete(&request("second")).await.unwrap().text, "reply");
        assert_eq!(mock.last_request().unwrap().prompt, "second");
    }

    #[tokio::test]
    async fn test_clones_share_script() {
        let mock = MockBackend::new("reply");
        let clone = mock.clone();
        mock.push_error("boom");
        assert!(clone.complete(&request("hello")).await.is_err());
        assert!(mock.complete(&request("hello")).await.is_ok());
    }
}
