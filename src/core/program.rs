// src/core/program.rs — Program generation entry point
//
// `CodeLoop` wires the configured providers, build environment and QA agent
// into an Orchestrator and exposes the single `generate_program` operation
// that hosts call.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::generator::LlmGenerator;
use super::orchestrator::{Orchestrator, RunResult};
use super::qa::LlmQaAgent;
use super::toolchain::{BuildEnvironment, DockerToolchain, LocalToolchain, ToolchainSpec};
use super::types::{Assignment, LoopConfig, ProgressEvent};
use super::workspace::Workspace;
use crate::infra::config::{Config, Runtime};
use crate::infra::errors::CodeLoopError;
use crate::provider::resolver;

/// What a host gets back from `generate_program`.
#[derive(Debug, Clone, Serialize)]
pub struct ProgramOutput {
    pub final_source: String,
    pub succeeded: bool,
    pub attempt_count: usize,
    pub qa_report: Option<String>,
    /// Set when the attempt budget ran out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgramOutput {
    fn from_run(result: &RunResult) -> Self {
        Self {
            final_source: result.final_source().to_string(),
            succeeded: result.succeeded(),
            attempt_count: result.attempt_count(),
            qa_report: result.qa_report().map(|r| r.render()),
            error: result.error().map(|e| e.to_string()),
        }
    }
}

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub max_attempts: Option<usize>,
    pub local: bool,
}

pub struct CodeLoop {
    orchestrator: Orchestrator,
    max_attempts: usize,
}

impl CodeLoop {
    pub fn new(orchestrator: Orchestrator, max_attempts: usize) -> Self {
        Self {
            orchestrator,
            max_attempts,
        }
    }

    /// Discover providers and build the full pipeline from config.
    pub async fn from_config(config: &Config, overrides: &Overrides) -> Result<Self, CodeLoopError> {
        let providers = resolver::discover_providers().await;
        let requested = overrides
            .model
            .as_deref()
            .or(config.models.generator.as_deref());
        let (gen_provider, gen_model) = resolver::resolve(&providers, requested)?;

        // An explicit --model applies to both sessions.
        let (qa_provider, qa_model) = match (&overrides.model, &config.models.qa) {
            (None, Some(qa)) => resolver::resolve(&providers, Some(qa.as_str()))?,
            _ => (gen_provider.clone(), gen_model.clone()),
        };
        tracing::info!("Generator: {}, QA: {}", gen_model, qa_model);

        let runtime = if overrides.local {
            Runtime::Local
        } else {
            config.toolchain.runtime
        };
        let env: Arc<dyn BuildEnvironment> = match runtime {
            Runtime::Docker => Arc::new(DockerToolchain::new(
                &config.toolchain.image,
                config.toolchain.network,
            )?),
            Runtime::Local => Arc::new(LocalToolchain),
        };
        let spec = ToolchainSpec::from_config(&config.toolchain)?;

        let generator = LlmGenerator::new(gen_provider, gen_model.model, spec.clone())?
            .with_sampling(config.refine.max_tokens, config.refine.temperature);
        let qa = LlmQaAgent::from_config(qa_provider, qa_model.model, &config.qa)?;

        let orchestrator = Orchestrator::new(Arc::new(generator), Workspace::new(env, spec))
            .with_qa(Arc::new(qa))
            .with_config(LoopConfig::from(&config.refine));
        let max_attempts = overrides.max_attempts.unwrap_or(config.refine.max_attempts);

        Ok(Self::new(orchestrator, max_attempts))
    }

    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.orchestrator = self.orchestrator.with_progress(cb);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Generate a program for `assignment`, optionally followed by a QA pass.
    ///
    /// A run that used up its attempt budget is still `Ok` with
    /// `succeeded = false`. Fatal outcomes (generation backend down, build
    /// environment missing, cancellation) are `Err`.
    pub async fn generate_program(
        &self,
        assignment: &str,
        qa: bool,
    ) -> Result<ProgramOutput, CodeLoopError> {
        self.generate_program_with_cancel(assignment, qa, &CancellationToken::new())
            .await
    }

    pub async fn generate_program_with_cancel(
        &self,
        assignment: &str,
        qa: bool,
        cancel: &CancellationToken,
    ) -> Result<ProgramOutput, CodeLoopError> {
        if assignment.trim().is_empty() {
            return Err(CodeLoopError::InvalidRequest(
                "assignment must not be empty".into(),
            ));
        }

        let assignment = Assignment::new(assignment);
        let result = self
            .orchestrator
            .run(&assignment, qa, self.max_attempts, cancel)
            .await;

        let output = ProgramOutput::from_run(&result);
        match result.into_error() {
            None | Some(CodeLoopError::AttemptBudgetExhausted { .. }) => Ok(output),
            Some(error) => Err(error),
        }
    }
}
