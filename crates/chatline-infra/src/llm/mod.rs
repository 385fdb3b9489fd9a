//! LLM provider implementations.
//!
//! Concrete [`LlmProvider`] implementations for the OpenAI-compatible Chat
//! Completions protocol and the Anthropic Messages API, plus a factory
//! ([`build_provider`]) that constructs the configured one.

pub mod anthropic;
mod http;
pub mod openai_compat;

use std::sync::Arc;

use secrecy::SecretString;
use tracing::{debug, info};

use chatline_core::llm::LlmProvider;
use chatline_types::config::ProviderSettings;
use chatline_types::error::ConfigError;
use chatline_types::llm::ProviderKind;

use self::anthropic::AnthropicProvider;
use self::openai_compat::OpenAiCompatibleProvider;

/// Create the provider described by `settings`.
///
/// The API key is read from the environment variable named by
/// `settings.api_key_env`. An OpenAI-compatible provider with an explicit
/// `base_url` may run without a key (local servers); every other
/// combination requires one.
pub fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    build_provider_with_key(settings, read_api_key(&settings.api_key_env))
}

fn build_provider_with_key(
    settings: &ProviderSettings,
    api_key: Option<SecretString>,
) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    let missing_key = || ConfigError::MissingEnv(settings.api_key_env.clone());

    let provider: Arc<dyn LlmProvider> = match settings.kind {
        ProviderKind::Anthropic => {
            let key = api_key.ok_or_else(missing_key)?;
            let provider = AnthropicProvider::new(key);
            match settings.base_url.as_deref() {
                Some(base_url) => Arc::new(provider.with_base_url(base_url)),
                None => Arc::new(provider),
            }
        }
        ProviderKind::OpenAiCompatible => match settings.base_url.as_deref() {
            Some(base_url) => {
                if api_key.is_none() {
                    debug!(base_url, "No API key configured; sending unauthenticated requests");
                }
                Arc::new(OpenAiCompatibleProvider::new(base_url, api_key))
            }
            None => Arc::new(OpenAiCompatibleProvider::openai(
                api_key.ok_or_else(missing_key)?,
            )),
        },
    };

    info!(provider = provider.name(), model = %settings.model, "LLM provider configured");
    Ok(provider)
}

fn read_api_key(var: &str) -> Option<SecretString> {
    std::env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(SecretString::from)
}
