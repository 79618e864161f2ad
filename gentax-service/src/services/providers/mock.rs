//! Mock provider for tests and offline development.

use super::{ChatProvider, FinishReason, GenerationParams, ProviderError, ProviderResponse};
use crate::models::ChatMessage;
use async_trait::async_trait;
use std::sync::Mutex;

/// How the mock answers.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Echo the last user message: `Mock response for: <question>`.
    Echo,
    /// Always answer with the given text.
    Fixed(String),
    /// Fail every call with `ProviderError::ApiError`.
    Fail(String),
    /// Fail every call with `ProviderError::RateLimited`.
    RateLimited,
}

/// Mock chat provider recording every conversation it receives.
pub struct MockChatProvider {
    behavior: MockBehavior,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockChatProvider {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    /// Conversations received so far, oldest first.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<ProviderResponse, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }

        let text = match &self.behavior {
            MockBehavior::Echo => {
                let question = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == crate::models::Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or_default();
                format!("Mock response for: {}", question)
            }
            MockBehavior::Fixed(text) => text.clone(),
            MockBehavior::Fail(msg) => return Err(ProviderError::ApiError(msg.clone())),
            MockBehavior::RateLimited => return Err(ProviderError::RateLimited),
        };

        let input_tokens = messages.iter().map(|m| m.content.len() as u32 / 4).sum();

        Ok(ProviderResponse {
            output_tokens: text.len() as u32 / 4,
            text,
            input_tokens,
            finish_reason: FinishReason::Complete,
        })
    }
}
