// src/provider/resolver.rs — Provider discovery and model resolution

use std::sync::Arc;

use super::anthropic::AnthropicProvider;
use super::ollama::OllamaProvider;
use super::retry::RetryProvider;
use super::{ModelProvider, ModelRef};
use crate::infra::errors::CodeLoopError;
use crate::infra::paths;

const ANTHROPIC_DEFAULT: &str = "claude-sonnet-4-20250514";

/// Discover providers from env vars, saved keys and a local Ollama server.
/// Every provider comes back wrapped in a `RetryProvider`.
pub async fn discover_providers() -> Vec<Arc<dyn ModelProvider>> {
    let mut providers: Vec<Arc<dyn ModelProvider>> = Vec::new();

    if let Some(key) = resolve_key("ANTHROPIC_API_KEY", "anthropic").await {
        let mut anthropic = AnthropicProvider::new(key);
        if let Ok(base) = std::env::var("ANTHROPIC_BASE_URL") {
            anthropic = anthropic.with_base_url(base);
        }
        providers.push(Arc::new(RetryProvider::new(Arc::new(anthropic))));
    }

    let mut ollama = OllamaProvider::new(std::env::var("OLLAMA_HOST").ok());
    match ollama.probe().await {
        Ok(models) if !models.is_empty() => {
            tracing::debug!("Ollama reachable with {} model(s)", models.len());
            providers.push(Arc::new(RetryProvider::new(Arc::new(ollama))));
        }
        Ok(_) => tracing::debug!("Ollama reachable but has no models"),
        Err(e) => tracing::debug!("Ollama not available: {}", e),
    }

    providers
}

/// Env var first, then ~/.codeloop/credentials/{provider}.key.
async fn resolve_key(env_var: &str, provider_id: &str) -> Option<String> {
    if let Some(key) = std::env::var(env_var).ok().filter(|k| !k.trim().is_empty()) {
        return Some(key);
    }
    let path = paths::credentials_dir().join(format!("{provider_id}.key"));
    tokio::fs::read_to_string(&path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Anthropic's coding default when a key is configured, else the best
/// installed Ollama model.
pub fn pick_default_model(providers: &[Arc<dyn ModelProvider>]) -> Option<ModelRef> {
    if find_provider(providers, "anthropic").is_some() {
        return Some(ModelRef::new("anthropic", ANTHROPIC_DEFAULT));
    }
    let ollama = find_provider(providers, "ollama")?;
    let installed: Vec<String> = ollama.models().into_iter().map(|m| m.id).collect();
    Some(ModelRef::new(
        "ollama",
        OllamaProvider::pick_best_model(&installed),
    ))
}

pub fn find_provider<'a>(
    providers: &'a [Arc<dyn ModelProvider>],
    provider_id: &str,
) -> Option<&'a Arc<dyn ModelProvider>> {
    providers.iter().find(|p| p.id() == provider_id)
}

/// Resolve a "provider/model" string (or the best default when `None`)
/// to a concrete provider.
pub fn resolve(
    providers: &[Arc<dyn ModelProvider>],
    requested: Option<&str>,
) -> Result<(Arc<dyn ModelProvider>, ModelRef), CodeLoopError> {
    let model_ref = match requested {
        Some(s) => ModelRef::parse(s).ok_or_else(|| {
            CodeLoopError::Config(format!("model '{}' is not in provider/model form", s))
        })?,
        None => pick_default_model(providers).ok_or(CodeLoopError::NoProvider)?,
    };

    let provider = find_provider(providers, &model_ref.provider)
        .cloned()
        .ok_or_else(|| {
            CodeLoopError::Config(format!(
                "provider '{}' is not available",
                model_ref.provider
            ))
        })?;

    Ok((provider, model_ref))
}
