// src/infra/config.rs — Configuration loading (TOML)

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default, rename = "loop")]
    pub refine: LoopSettings,

    #[serde(default)]
    pub toolchain: ToolchainConfig,

    #[serde(default)]
    pub qa: QaConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model for code generation, "provider/model".
    pub generator: Option<String>,
    /// Model for the QA session. Falls back to `generator`.
    pub qa: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    pub max_attempts: usize,
    /// Whole-run deadline. 0 disables it.
    pub timeout_seconds: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_seconds: 900,
            max_tokens: 8192,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Docker,
    Local,
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Runtime::Docker => write!(f, "docker"),
            Runtime::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub runtime: Runtime,
    pub image: String,
    pub entry_path: String,
    pub build_command: String,
    pub run_command: String,
    pub build_timeout_seconds: u64,
    /// Docker only: allow network access inside the build container.
    pub network: bool,
    /// Fixed files every workspace starts with, keyed by relative path.
    pub scaffold: BTreeMap<String, String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            runtime: Runtime::Docker,
            image: "rust:1-slim".into(),
            entry_path: "main.rs".into(),
            build_command: "rustc --edition 2021 -o app main.rs".into(),
            run_command: "./app".into(),
            build_timeout_seconds: 300,
            network: false,
            scaffold: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    pub max_steps: u32,
    pub command_timeout_seconds: u64,
    pub max_output_bytes: usize,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            max_steps: 8,
            command_timeout_seconds: 30,
            max_output_bytes: 16 * 1024,
        }
    }
}

impl Config {
    /// The user's config file, or defaults when there is none yet.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let parsed: Config =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject values the loop cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.refine.max_attempts == 0 {
            anyhow::bail!("loop.max_attempts must be at least 1");
        }
        if self.toolchain.entry_path.trim().is_empty() {
            anyhow::bail!("toolchain.entry_path must not be empty");
        }
        if Path::new(&self.toolchain.entry_path).is_absolute() {
            anyhow::bail!("toolchain.entry_path must be relative");
        }
        if self.toolchain.build_command.trim().is_empty() {
            anyhow::bail!("toolchain.build_command must not be empty");
        }
        Ok(())
    }
}
