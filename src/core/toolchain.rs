// src/core/toolchain.rs — Build environment boundary
//
// A build environment runs one shell command against a materialized source
// tree. The host shell and a throw-away Docker container are supported.
// Every process is spawned with kill_on_drop so an aborted future (timeout,
// cancellation) takes the process down with it.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::types::ProcessOutput;
use crate::infra::config::ToolchainConfig;
use crate::infra::errors::CodeLoopError;

/// Fixed identity of the base environment every workspace starts from.
#[derive(Debug, Clone)]
pub struct ToolchainSpec {
    pub image: String,
    pub entry_path: PathBuf,
    pub build_command: String,
    pub run_command: String,
    pub build_timeout: Duration,
    pub scaffold: BTreeMap<PathBuf, String>,
}

impl ToolchainSpec {
    pub fn new(
        entry_path: impl Into<PathBuf>,
        build_command: impl Into<String>,
    ) -> Result<Self, CodeLoopError> {
        let entry_path = entry_path.into();
        check_relative(&entry_path)?;
        Ok(Self {
            image: String::new(),
            entry_path,
            build_command: build_command.into(),
            run_command: String::new(),
            build_timeout: Duration::from_secs(300),
            scaffold: BTreeMap::new(),
        })
    }

    pub fn with_run_command(mut self, command: impl Into<String>) -> Self {
        self.run_command = command.into();
        self
    }

    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    pub fn with_scaffold_file(
        mut self,
        path: impl Into<PathBuf>,
        content: impl Into<String>,
    ) -> Result<Self, CodeLoopError> {
        let path = path.into();
        check_relative(&path)?;
        self.scaffold.insert(path, content.into());
        Ok(self)
    }

    pub fn from_config(cfg: &ToolchainConfig) -> Result<Self, CodeLoopError> {
        let mut spec = Self::new(&cfg.entry_path, &cfg.build_command)?
            .with_run_command(&cfg.run_command)
            .with_build_timeout(Duration::from_secs(cfg.build_timeout_seconds.max(1)));
        spec.image = cfg.image.clone();
        for (path, content) in &cfg.scaffold {
            spec = spec.with_scaffold_file(path, content)?;
        }
        Ok(spec)
    }
}

/// Tree paths must stay inside the workspace root.
fn check_relative(path: &Path) -> Result<(), CodeLoopError> {
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.as_os_str().is_empty() || escapes {
        return Err(CodeLoopError::Config(format!(
            "workspace path '{}' must be relative and stay inside the tree",
            path.display()
        )));
    }
    Ok(())
}

#[async_trait]
pub trait BuildEnvironment: Send + Sync {
    fn name(&self) -> &str;

    /// Run `command` through `sh -c` with `dir` as the tree root.
    async fn run(
        &self,
        dir: &Path,
        command: &str,
        timeout: Duration,
    ) -> Result<ProcessOutput, CodeLoopError>;
}

/// Runs commands with the host shell. Isolation is limited to the temp dir.
#[derive(Debug, Default, Clone)]
pub struct LocalToolchain;

#[async_trait]
impl BuildEnvironment for LocalToolchain {
    fn name(&self) -> &str {
        "local"
    }

    async fn run(
        &self,
        dir: &Path,
        command: &str,
        timeout: Duration,
    ) -> Result<ProcessOutput, CodeLoopError> {
        tracing::debug!("Running locally in {:?}: {}", dir, command);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(dir);
        run_process(cmd, timeout).await
    }
}

/// Runs each command in a fresh `docker run --rm` container with the tree
/// bind-mounted at /workspace.
#[derive(Debug, Clone)]
pub struct DockerToolchain {
    binary: PathBuf,
    image: String,
    network: bool,
}

impl DockerToolchain {
    pub fn new(image: impl Into<String>, network: bool) -> Result<Self, CodeLoopError> {
        let binary = which::which("docker").map_err(|e| {
            CodeLoopError::EnvironmentUnavailable(format!("docker not found on PATH: {}", e))
        })?;
        Ok(Self {
            binary,
            image: image.into(),
            network,
        })
    }

    fn docker_args(
        &self,
        container: &str,
        dir: &Path,
        user: Option<&str>,
        command: &str,
    ) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container.to_string(),
        ];
        // Build output must stay removable by the host user.
        if let Some(user) = user {
            args.extend(["--user".into(), user.to_string()]);
            args.extend(["-e".into(), "HOME=/tmp".into()]);
        }
        if !self.network {
            args.push("--network".into());
            args.push("none".into());
        }
        args.push("-v".into());
        args.push(format!("{}:/workspace", dir.display()));
        args.push("-w".into());
        args.push("/workspace".into());
        args.push(self.image.clone());
        args.push("sh".into());
        args.push("-c".into());
        args.push(command.to_string());
        args
    }
}

/// Force-removes the container unless the run finished normally.
struct ContainerGuard<'a> {
    binary: &'a Path,
    name: String,
    armed: bool,
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("Removing container {}", self.name);
            let _ = std::process::Command::new(self.binary)
                .args(["rm", "-f", &self.name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
        }
    }
}

#[async_trait]
impl BuildEnvironment for DockerToolchain {
    fn name(&self) -> &str {
        "docker"
    }

    async fn run(
        &self,
        dir: &Path,
        command: &str,
        timeout: Duration,
    ) -> Result<ProcessOutput, CodeLoopError> {
        let container = format!("codeloop-{}", uuid::Uuid::new_v4().simple());
        tracing::debug!("Running in {} ({}): {}", container, self.image, command);

        let mut guard = ContainerGuard {
            binary: &self.binary,
            name: container.clone(),
            armed: true,
        };

        let user = owner_of(dir);
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.docker_args(&container, dir, user.as_deref(), command));
        let output = run_process(cmd, timeout).await?;

        guard.armed = output.timed_out;
        Ok(output)
    }
}

/// `uid:gid` of the directory's owner.
#[cfg(unix)]
fn owner_of(dir: &Path) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(dir).ok()?;
    Some(format!("{}:{}", meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
fn owner_of(_dir: &Path) -> Option<String> {
    None
}

/// Spawn, wait with a timeout, and fold stdout + stderr into one text.
pub(crate) async fn run_process(
    mut cmd: Command,
    timeout: Duration,
) -> Result<ProcessOutput, CodeLoopError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
        CodeLoopError::EnvironmentUnavailable(format!("failed to spawn process: {}", e))
    })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            Ok(ProcessOutput {
                exit_status: output.status.code(),
                output: combine(&stdout, &stderr),
                timed_out: false,
            })
        }
        Ok(Err(e)) => Err(CodeLoopError::Io(e)),
        Err(_) => Ok(ProcessOutput {
            exit_status: None,
            output: format!("command timed out after {:?}", timeout),
            timed_out: true,
        }),
    }
}

fn combine(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) if stdout.ends_with('\n') => format!("{}{}", stdout, stderr),
        (false, false) => format!("{}\n{}", stdout, stderr),
    }
}
