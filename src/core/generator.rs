// src/core/generator.rs — Code generation capability

use std::sync::Arc;

use async_trait::async_trait;

use super::prompt::{extract_source, fence, language_hint, Prompts};
use super::toolchain::ToolchainSpec;
use super::types::{Assignment, Attempt};
use crate::infra::errors::CodeLoopError;
use crate::provider::{ChatRequest, Message, ModelProvider, StopReason};

/// Turns an assignment plus the session history into one candidate source.
///
/// One call, one candidate: retrying is the orchestrator's job. Implementations
/// report an unreachable or failing backend as `GenerationUnavailable`.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(
        &self,
        assignment: &Assignment,
        history: &[Attempt],
    ) -> Result<String, CodeLoopError>;
}

/// Generator backed by a chat model.
///
/// The session is replayed as a conversation: the assignment, then for each
/// failed attempt the candidate it produced followed by the full build output.
pub struct LlmGenerator {
    provider: Arc<dyn ModelProvider>,
    model: String,
    spec: Arc<ToolchainSpec>,
    prompts: Prompts,
    max_tokens: u32,
    temperature: f32,
}

impl LlmGenerator {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        model: impl Into<String>,
        spec: ToolchainSpec,
    ) -> Result<Self, CodeLoopError> {
        Ok(Self {
            provider,
            model: model.into(),
            spec: Arc::new(spec),
            prompts: Prompts::new()?,
            max_tokens: 8192,
            temperature: 0.2,
        })
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub(crate) fn build_request(
        &self,
        assignment: &Assignment,
        history: &[Attempt],
    ) -> Result<ChatRequest, CodeLoopError> {
        let language = language_hint(&self.spec.entry_path);
        let mut messages = vec![Message::user(self.prompts.assignment(assignment.text())?)];
        for attempt in history {
            messages.push(Message::assistant(fence(attempt.source(), language)));
            messages.push(Message::user(self.prompts.feedback(attempt, &self.spec)?));
        }

        Ok(ChatRequest {
            model: self.model.clone(),
            messages,
            tools: Vec::new(),
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            system: Some(self.prompts.generator_system(&self.spec)?),
        })
    }
}

#[async_trait]
impl CodeGenerator for LlmGenerator {
    async fn generate(
        &self,
        assignment: &Assignment,
        history: &[Attempt],
    ) -> Result<String, CodeLoopError> {
        let attempt = history.len();
        let request = self.build_request(assignment, history)?;

        tracing::debug!(
            attempt,
            model = %self.model,
            messages = request.messages.len(),
            "Requesting candidate"
        );

        let response = self.provider.chat(request).await.map_err(|e| {
            CodeLoopError::GenerationUnavailable {
                attempt,
                message: e.to_string(),
                last_diagnostics: None,
            }
        })?;

        let source = extract_source(&response.content);
        if source.trim().is_empty() {
            return Err(CodeLoopError::GenerationUnavailable {
                attempt,
                message: format!("model '{}' returned no source", self.model),
                last_diagnostics: None,
            });
        }

        if matches!(response.stop_reason, StopReason::MaxTokens) {
            tracing::warn!(
                attempt,
                max_tokens = self.max_tokens,
                "Reply hit the token limit; the candidate may be cut off"
            );
        }
        tracing::debug!(
            attempt,
            tokens = response.usage.total(),
            source_bytes = source.len(),
            "Candidate received"
        );
        Ok(source)
    }
}
