//! LLM provider implementations for Concierge.
//!
//! Every backend speaks the OpenAI chat-completions dialect and implements
//! `concierge_core::Provider`. [`build_provider`] picks the endpoint from
//! configuration.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use concierge_config::ProviderConfig;
use concierge_core::Provider;
use concierge_core::error::ProviderError;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Build the configured provider. `timeout` bounds each HTTP request.
pub fn build_provider(
    config: &ProviderConfig,
    timeout: Duration,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let name = config.name.as_str();
    let base_url = match &config.api_url {
        Some(url) => url.clone(),
        None => default_base_url(name).ok_or_else(|| {
            ProviderError::NotConfigured(format!("provider '{name}' needs an api_url"))
        })?,
    };

    let api_key = match (name, &config.api_key) {
        (_, Some(key)) => key.clone(),
        ("ollama" | "vllm" | "llamacpp", None) => "local".to_string(),
        (_, None) => {
            return Err(ProviderError::NotConfigured(format!(
                "provider '{name}' has no API key"
            )));
        }
    };

    info!(provider = name, base_url = %base_url, "Using provider");
    let provider = OpenAiCompatProvider::new(name, base_url, api_key, timeout)?;
    Ok(Arc::new(provider))
}

/// Base URL for well-known OpenAI-compatible endpoints.
fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").unwrap().contains("openrouter.ai"));
        assert!(default_base_url("ollama").unwrap().contains("localhost:11434"));
        assert!(default_base_url("mystery").is_none());
    }

    #[test]
    fn builds_openrouter_with_key() {
        let config = ProviderConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        let provider = build_provider(&config, TIMEOUT).unwrap();
        assert_eq!(provider.name(), "openrouter");
    }

    #[test]
    fn missing_key_is_not_configured() {
        let config = ProviderConfig::default();
        assert!(matches!(
            build_provider(&config, TIMEOUT),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn local_endpoints_need_no_key() {
        let config = ProviderConfig {
            name: "ollama".into(),
            ..Default::default()
        };
        assert!(build_provider(&config, TIMEOUT).is_ok());
    }

    #[test]
    fn unknown_provider_requires_url() {
        let mut config = ProviderConfig {
            name: "in-house".into(),
            api_key: Some("k".into()),
            ..Default::default()
        };
        assert!(build_provider(&config, TIMEOUT).is_err());

        config.api_url = Some("http://llm.internal/v1".into());
        assert_eq!(build_provider(&config, TIMEOUT).unwrap().name(), "in-house");
    }
}
