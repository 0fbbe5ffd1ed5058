// src/core/workspace.rs — Copy-on-write workspace values
//
// A Workspace is a cheap, immutable value: the base environment plus the
// staged source, both behind Arcs. Staging new source yields a new value.
// Nothing touches the filesystem until a build or sandbox materializes the
// tree into a fresh temp dir, which is removed again on drop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::toolchain::{BuildEnvironment, ToolchainSpec};
use super::types::ProcessOutput;
use crate::infra::errors::CodeLoopError;
use crate::infra::paths;

#[derive(Clone)]
pub struct Workspace {
    id: String,
    env: Arc<dyn BuildEnvironment>,
    spec: Arc<ToolchainSpec>,
    source: Option<Arc<str>>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.id)
            .field("env", &self.env.name())
            .field("entry_path", &self.spec.entry_path)
            .field("source_bytes", &self.source().len())
            .finish()
    }
}

impl Workspace {
    /// Clean workspace on the given base environment, with no staged source.
    pub fn new(env: Arc<dyn BuildEnvironment>, spec: ToolchainSpec) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            env,
            spec: Arc::new(spec),
            source: None,
        }
    }

    /// New workspace with `text` staged at the entry path. `self` is untouched.
    pub fn with_source(&self, text: impl Into<String>) -> Workspace {
        Workspace {
            id: uuid::Uuid::new_v4().to_string(),
            env: self.env.clone(),
            spec: self.spec.clone(),
            source: Some(Arc::from(text.into())),
        }
    }

    /// Staged source, verbatim. Empty for a clean workspace.
    pub fn source(&self) -> &str {
        self.source.as_deref().unwrap_or("")
    }

    pub(crate) fn shared_source(&self) -> Arc<str> {
        self.source.clone().unwrap_or_else(|| Arc::from(""))
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec(&self) -> &ToolchainSpec {
        &self.spec
    }

    /// Run the toolchain's build command on a fresh copy of the tree.
    pub async fn build(&self) -> Result<ProcessOutput, CodeLoopError> {
        let dir = self.materialize().await?;
        tracing::debug!(workspace = %self.id, "Building in {:?}", dir.path());
        let mut output = self
            .env
            .run(dir.path(), &self.spec.build_command, self.spec.build_timeout)
            .await?;
        if output.timed_out {
            output.output = format!("build timed out after {:?}", self.spec.build_timeout);
        }
        Ok(output)
    }

    /// Materialize the tree once and keep it alive for a sequence of commands.
    pub async fn open_sandbox(&self) -> Result<Sandbox, CodeLoopError> {
        let dir = self.materialize().await?;
        Ok(Sandbox {
            dir,
            env: self.env.clone(),
            spec: self.spec.clone(),
        })
    }

    async fn materialize(&self) -> Result<TempDir, CodeLoopError> {
        let root = paths::work_dir();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            CodeLoopError::EnvironmentUnavailable(format!(
                "cannot create work dir {}: {}",
                root.display(),
                e
            ))
        })?;
        let dir = tempfile::Builder::new()
            .prefix("codeloop-")
            .tempdir_in(&root)
            .map_err(|e| {
                CodeLoopError::EnvironmentUnavailable(format!("cannot create temp dir: {}", e))
            })?;

        for (path, content) in &self.spec.scaffold {
            write_file(dir.path(), path, content).await?;
        }
        write_file(dir.path(), &self.spec.entry_path, self.source()).await?;
        Ok(dir)
    }
}

async fn write_file(root: &Path, rel: &Path, content: &str) -> Result<(), CodeLoopError> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, content).await?;
    Ok(())
}

/// A materialized tree that lives until dropped. Build artifacts persist
/// between commands, so a program built once can be run repeatedly.
pub struct Sandbox {
    dir: TempDir,
    env: Arc<dyn BuildEnvironment>,
    spec: Arc<ToolchainSpec>,
}

impl Sandbox {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn spec(&self) -> &ToolchainSpec {
        &self.spec
    }

    pub async fn exec(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ProcessOutput, CodeLoopError> {
        self.env.run(self.dir.path(), command, timeout).await
    }

    pub async fn build(&self) -> Result<ProcessOutput, CodeLoopError> {
        self.exec(&self.spec.build_command, self.spec.build_timeout)
            .await
    }
}
