//! Bridges a rig `CompletionModel` to `LlmProvider`.

use async_trait::async_trait;
use rig::completion::{CompletionError, CompletionModel};
use rig::message::AssistantContent;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Map a rig error onto `LlmError`.
fn map_error(provider: &str, err: CompletionError) -> LlmError {
    match err {
        CompletionError::ProviderError(message) => classify_provider_message(provider, message),
        CompletionError::JsonError(e) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: e.to_string(),
        },
        CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason,
        },
        other => LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Gemini reports the error class as a status word in the body.
fn classify_provider_message(provider: &str, message: String) -> LlmError {
    let provider = provider.to_string();
    if message.contains("UNAUTHENTICATED")
        || message.contains("PERMISSION_DENIED")
        || message.contains("API_KEY_INVALID")
    {
        LlmError::AuthFailed { provider }
    } else if message.contains("RESOURCE_EXHAUSTED") {
        LlmError::RateLimited {
            provider,
            retry_after: None,
        }
    } else {
        LlmError::RequestFailed {
            provider,
            reason: message,
        }
    }
}

pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let response = self
            .model
            .completion_request(request.prompt)
            .send()
            .await
            .map_err(|e| map_error(&self.model_name, e))?;

        // Only text parts count; reasoning and tool calls are dropped.
        let content = response
            .choice
            .iter()
            .filter_map(|part| match part {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens: u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX),
        })
    }
}
