// src/infra/errors.rs — Error types for codeloop

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodeLoopError {
    // Loop outcomes
    #[error("Build failed on attempt {attempt} (exit status {exit_status:?})")]
    BuildFailure {
        attempt: usize,
        exit_status: Option<i32>,
        diagnostics: String,
    },

    #[error("Attempt budget exhausted after {attempts} attempt(s)")]
    AttemptBudgetExhausted {
        attempts: usize,
        last_diagnostics: String,
    },

    /// `last_diagnostics` is the build output of the last recorded attempt,
    /// if one had been built before the backend failed.
    #[error("Code generation unavailable on attempt {attempt}: {message}")]
    GenerationUnavailable {
        attempt: usize,
        message: String,
        last_diagnostics: Option<String>,
    },

    #[error("Cancelled after {attempts} attempt(s): {reason}")]
    Cancelled {
        attempts: usize,
        reason: CancelReason,
        last_diagnostics: Option<String>,
    },

    #[error("QA evaluation failed: {0}")]
    QaFailure(String),

    #[error("Build environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Provider errors (retriable)
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("No provider configured. Set ANTHROPIC_API_KEY or run a local Ollama server.")]
    NoProvider,

    // Infra
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a run stopped before reaching a terminal build outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller triggered the cancellation token.
    Caller,
    /// The configured run deadline elapsed.
    Deadline,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Caller => write!(f, "cancelled by caller"),
            CancelReason::Deadline => write!(f, "run deadline elapsed"),
        }
    }
}

impl CodeLoopError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CodeLoopError::Provider {
                retriable: true,
                ..
            } | CodeLoopError::RateLimited { .. }
        )
    }

    /// Most recent diagnostic text carried by the error, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            CodeLoopError::BuildFailure { diagnostics, .. } => Some(diagnostics),
            CodeLoopError::AttemptBudgetExhausted {
                last_diagnostics, ..
            } => Some(last_diagnostics),
            CodeLoopError::GenerationUnavailable {
                last_diagnostics, ..
            }
            | CodeLoopError::Cancelled {
                last_diagnostics, ..
            } => last_diagnostics.as_deref(),
            _ => None,
        }
    }

    /// Attach the last build output to a fatal loop error that lacks it.
    /// Other kinds pass through unchanged.
    pub fn with_last_diagnostics(mut self, diagnostics: Option<&str>) -> Self {
        if let CodeLoopError::GenerationUnavailable {
            last_diagnostics, ..
        }
        | CodeLoopError::Cancelled {
            last_diagnostics, ..
        } = &mut self
        {
            if last_diagnostics.is_none() {
                *last_diagnostics = diagnostics.map(str::to_string);
            }
        }
        self
    }
}
