//! Generation service configuration

use super::{AnthropicService, LlmService, LoggingService};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Configuration for the generation service
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub anthropic_api_key: Option<String>,
    pub model: Option<String>,
    /// Optional gateway base URL that fronts the provider
    pub gateway: Option<String>,
    pub max_tokens: Option<u32>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            model: std::env::var("ANTHROPIC_MODEL").ok(),
            gateway: std::env::var("LLM_GATEWAY").ok(),
            max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Build the configured service, wrapped with logging.
    ///
    /// Returns `None` when no usable credentials are present; in gateway
    /// mode the gateway handles authentication.
    pub fn connect(&self, timeout: Duration) -> Option<Arc<dyn LlmService>> {
        let api_key = match (&self.gateway, &self.anthropic_api_key) {
            (Some(_), key) => key.clone().unwrap_or_else(|| "implicit".to_string()),
            (None, Some(key)) if !key.is_empty() => key.clone(),
            (None, _) => return None,
        };

        match AnthropicService::new(
            api_key,
            self.model().to_string(),
            self.gateway.as_deref(),
            self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            timeout,
        ) {
            Ok(service) => Some(Arc::new(LoggingService::new(Arc::new(service)))),
            Err(e) => {
                tracing::error!(error = %e, "Failed to build generation client");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_key_means_unconfigured() {
        let config = LlmConfig::default();
        assert!(config.connect(Duration::from_secs(1)).is_none());

        let empty = LlmConfig {
            anthropic_api_key: Some(String::new()),
            ..LlmConfig::default()
        };
        assert!(empty.connect(Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_gateway_mode_needs_no_key() {
        let config = LlmConfig {
            gateway: Some("http://localhost:9999".to_string()),
            ..LlmConfig::default()
        };
        let service = config.connect(Duration::from_secs(1)).unwrap();
        assert_eq!(service.model_id(), DEFAULT_MODEL);
    }
}
