// src/core/orchestrator.rs — Generate-build-refine loop controller

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::generator::CodeGenerator;
use super::qa::QaAgent;
use super::types::*;
use super::verifier::BuildVerifier;
use super::workspace::Workspace;
use crate::infra::errors::{CancelReason, CodeLoopError};

/// Drives one assignment through generate → verify → refine until a build
/// passes, the attempt budget runs out, or a fatal error stops the loop.
///
/// An orchestrator holds no per-run state, so one instance can serve many
/// concurrent `run` calls. Every attempt stages its candidate on a clean copy
/// of the base workspace.
pub struct Orchestrator {
    generator: Arc<dyn CodeGenerator>,
    verifier: BuildVerifier,
    qa: Option<Arc<dyn QaAgent>>,
    base: Workspace,
    config: LoopConfig,
    /// Optional callback for real-time progress events.
    on_progress: Option<Box<dyn Fn(ProgressEvent) + Send + Sync>>,
}

/// Outcome of one `Orchestrator::run`.
#[derive(Debug)]
pub struct RunResult {
    /// Every recorded attempt, ordinals contiguous from 0.
    pub attempts: Vec<Attempt>,
    pub outcome: RunOutcome,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum RunOutcome {
    Succeeded {
        workspace: Workspace,
        qa_report: Option<QaReport>,
    },
    Failed {
        error: CodeLoopError,
    },
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded { .. })
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Source of the passing build, or of the last attempt on failure.
    pub fn final_source(&self) -> &str {
        match &self.outcome {
            RunOutcome::Succeeded { workspace, .. } => workspace.source(),
            RunOutcome::Failed { .. } => self.attempts.last().map(|a| a.source()).unwrap_or(""),
        }
    }

    pub fn workspace(&self) -> Option<&Workspace> {
        match &self.outcome {
            RunOutcome::Succeeded { workspace, .. } => Some(workspace),
            RunOutcome::Failed { .. } => None,
        }
    }

    pub fn qa_report(&self) -> Option<&QaReport> {
        match &self.outcome {
            RunOutcome::Succeeded { qa_report, .. } => qa_report.as_ref(),
            RunOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&CodeLoopError> {
        match &self.outcome {
            RunOutcome::Succeeded { .. } => None,
            RunOutcome::Failed { error } => Some(error),
        }
    }

    pub fn into_error(self) -> Option<CodeLoopError> {
        match self.outcome {
            RunOutcome::Succeeded { .. } => None,
            RunOutcome::Failed { error } => Some(error),
        }
    }
}

impl Orchestrator {
    pub fn new(generator: Arc<dyn CodeGenerator>, base: Workspace) -> Self {
        Self {
            generator,
            verifier: BuildVerifier::new(),
            qa: None,
            base,
            config: LoopConfig::default(),
            on_progress: None,
        }
    }

    pub fn with_qa(mut self, agent: Arc<dyn QaAgent>) -> Self {
        self.qa = Some(agent);
        self
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Set a callback for real-time progress events.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    pub fn base(&self) -> &Workspace {
        &self.base
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    fn transition(&self, state: &mut LoopState, to: LoopState) {
        let from = *state;
        tracing::info!("{} -> {}", from, to);
        *state = to;
        self.emit(ProgressEvent::StateChanged { from, to });
    }

    /// Run the loop for one assignment.
    ///
    /// Never returns `Err`: every error is carried in the result next to the
    /// attempt history that explains it.
    pub async fn run(
        &self,
        assignment: &Assignment,
        qa_requested: bool,
        max_attempts: usize,
        cancel: &CancellationToken,
    ) -> RunResult {
        let started = Instant::now();
        let deadline = self
            .config
            .timeout
            .map(|t| tokio::time::Instant::now() + t);
        let mut state = LoopState::Init;
        let mut attempts = Vec::new();

        let outcome = match self
            .drive(assignment, max_attempts, cancel, deadline, &mut state, &mut attempts)
            .await
        {
            Ok(workspace) => {
                self.transition(&mut state, LoopState::Succeeded);
                let qa_report = if qa_requested {
                    self.evaluate(assignment, &workspace, attempts.len(), cancel, deadline)
                        .await
                } else {
                    None
                };
                RunOutcome::Succeeded {
                    workspace,
                    qa_report,
                }
            }
            Err(error) => {
                let error = error
                    .with_last_diagnostics(attempts.last().map(|a| a.build.output.as_str()));
                self.transition(&mut state, LoopState::Failed);
                tracing::warn!("Run failed after {} attempt(s): {}", attempts.len(), error);
                RunOutcome::Failed { error }
            }
        };

        let elapsed = started.elapsed();
        self.emit(ProgressEvent::Finished {
            succeeded: matches!(outcome, RunOutcome::Succeeded { .. }),
            attempts: attempts.len(),
            elapsed,
        });

        RunResult {
            attempts,
            outcome,
            elapsed,
        }
    }

    /// The non-terminal part of the state machine. Returns the passing workspace.
    async fn drive(
        &self,
        assignment: &Assignment,
        max_attempts: usize,
        cancel: &CancellationToken,
        deadline: Option<tokio::time::Instant>,
        state: &mut LoopState,
        history: &mut Vec<Attempt>,
    ) -> Result<Workspace, CodeLoopError> {
        if max_attempts == 0 {
            return Err(CodeLoopError::InvalidRequest(
                "max_attempts must be at least 1".into(),
            ));
        }
        if assignment.is_blank() {
            return Err(CodeLoopError::InvalidRequest(
                "assignment must not be empty".into(),
            ));
        }

        loop {
            let ordinal = history.len();
            self.transition(state, LoopState::Generating);
            self.emit(ProgressEvent::AttemptStarted {
                attempt: ordinal + 1,
                max_attempts,
            });

            let started_at = Utc::now();
            let clock = Instant::now();
            let source = guarded(
                cancel,
                deadline,
                ordinal,
                self.generator.generate(assignment, history),
            )
            .await?;

            self.transition(state, LoopState::Verifying);
            let workspace = self.base.with_source(source);
            let build = guarded(cancel, deadline, ordinal, self.verifier.verify(&workspace)).await?;
            self.emit(ProgressEvent::BuildFinished {
                attempt: ordinal + 1,
                succeeded: build.succeeded,
                exit_status: build.exit_status,
            });

            let attempt = Attempt {
                ordinal,
                source: workspace.shared_source(),
                build,
                started_at,
                duration: clock.elapsed(),
            };
            let succeeded = attempt.succeeded();
            let failure = (!succeeded).then(|| CodeLoopError::BuildFailure {
                attempt: ordinal,
                exit_status: attempt.build.exit_status,
                diagnostics: attempt.build.output.clone(),
            });
            history.push(attempt);

            let Some(failure) = failure else {
                tracing::info!("Build passed on attempt {}", ordinal + 1);
                return Ok(workspace);
            };

            // The failed workspace is dropped here; the next attempt starts clean.
            self.transition(state, LoopState::Refining);
            if history.len() >= max_attempts {
                return Err(CodeLoopError::AttemptBudgetExhausted {
                    attempts: history.len(),
                    last_diagnostics: failure.diagnostics().unwrap_or_default().to_string(),
                });
            }
            tracing::warn!("{}; refining", failure);
        }
    }

    /// Advisory QA pass. Any error degrades to no report.
    async fn evaluate(
        &self,
        assignment: &Assignment,
        workspace: &Workspace,
        attempts: usize,
        cancel: &CancellationToken,
        deadline: Option<tokio::time::Instant>,
    ) -> Option<QaReport> {
        let Some(agent) = &self.qa else {
            tracing::warn!("QA requested but no QA agent is configured");
            return None;
        };

        let on_step = |step: &QaStep| {
            self.emit(ProgressEvent::QaStep {
                command: step.command.clone(),
                exit_status: step.exit_status,
            })
        };
        let session = agent.evaluate_observed(assignment, workspace, &on_step);
        match guarded(cancel, deadline, attempts, session).await {
            Ok(report) => Some(report),
            Err(e) => {
                let e = match e {
                    CodeLoopError::QaFailure(_) => e,
                    other => CodeLoopError::QaFailure(other.to_string()),
                };
                tracing::warn!("{}", e);
                None
            }
        }
    }
}

/// Await `fut` unless the caller cancels or the run deadline passes first.
/// Dropping `fut` aborts whatever it had in flight.
async fn guarded<T>(
    cancel: &CancellationToken,
    deadline: Option<tokio::time::Instant>,
    attempts: usize,
    fut: impl Future<Output = Result<T, CodeLoopError>>,
) -> Result<T, CodeLoopError> {
    let expiry = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CodeLoopError::Cancelled {
            attempts,
            reason: CancelReason::Caller,
            last_diagnostics: None,
        }),
        _ = expiry => Err(CodeLoopError::Cancelled {
            attempts,
            reason: CancelReason::Deadline,
            last_diagnostics: None,
        }),
        result = fut => result,
    }
}
