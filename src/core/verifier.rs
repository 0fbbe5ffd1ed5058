// src/core/verifier.rs — Build verification

use super::types::{BuildResult, ProcessOutput};
use super::workspace::Workspace;
use crate::infra::errors::CodeLoopError;

/// Runs a workspace build and classifies the outcome.
///
/// Diagnostics pass through verbatim: the generator needs the full compiler
/// output as corrective context, so nothing is trimmed or summarized here.
#[derive(Debug, Default, Clone)]
pub struct BuildVerifier;

impl BuildVerifier {
    pub fn new() -> Self {
        Self
    }

    pub async fn verify(&self, workspace: &Workspace) -> Result<BuildResult, CodeLoopError> {
        let output = workspace.build().await?;
        let result = classify(output);
        tracing::debug!(
            workspace = workspace.id(),
            succeeded = result.succeeded,
            exit_status = ?result.exit_status,
            "Build finished"
        );
        Ok(result)
    }
}

/// Zero exit status passes; anything else (including a killed build) fails.
pub fn classify(output: ProcessOutput) -> BuildResult {
    let succeeded = !output.timed_out && output.exit_status == Some(0);
    BuildResult {
        succeeded,
        exit_status: output.exit_status,
        output: output.output,
    }
}
