//! LLM integration.
//!
//! Uses rig-core's Gemini provider for HTTP transport; `RigAdapter` bridges
//! rig's `CompletionModel` to our `LlmProvider`, and `RetryProvider` adds
//! per-call timeouts and backoff on top.

pub mod provider;
pub mod retry;
mod rig_adapter;

pub use provider::*;
pub use retry::{RetryPolicy, RetryProvider};
pub use rig_adapter::RigAdapter;

use std::sync::Arc;
use std::time::Duration;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

/// Create the production LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::gemini;

    let client: gemini::Client =
        gemini::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "gemini".to_string(),
                reason: format!("Failed to create Gemini client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Gemini (model: {})", config.model);

    let policy = RetryPolicy {
        max_retries: config.max_retries,
        timeout: config.timeout,
        ..RetryPolicy::default()
    };
    let adapter = RigAdapter::new(model, &config.model);
    Ok(Arc::new(RetryProvider::new(Arc::new(adapter), policy)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_provider_constructs_without_network() {
        // The key is only checked by the API on the first request.
        let config = LlmConfig {
            api_key: secrecy::SecretString::from("test-key"),
            model: "gemini-2.5-flash".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 1,
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "gemini-2.5-flash");
    }
}
