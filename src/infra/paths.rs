// src/infra/paths.rs — Config and scratch path management
//
// All config paths respect CODELOOP_HOME for isolation. When it is unset,
// config lives in ~/.codeloop/. Workspaces are materialized under the
// system temp dir unless CODELOOP_WORK_DIR points elsewhere.

use std::path::PathBuf;

/// Returns the CODELOOP_HOME override, if set.
fn codeloop_home() -> Option<PathBuf> {
    std::env::var_os("CODELOOP_HOME").map(PathBuf::from)
}

/// Home directory (falls back to the current dir on exotic platforms).
pub fn dirs_home() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $CODELOOP_HOME/ or ~/.codeloop/
pub fn config_dir() -> PathBuf {
    if let Some(home) = codeloop_home() {
        return home;
    }
    dirs_home().join(".codeloop")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Saved API keys: ~/.codeloop/credentials/{provider}.key
pub fn credentials_dir() -> PathBuf {
    config_dir().join("credentials")
}

/// Parent directory for materialized workspaces.
pub fn work_dir() -> PathBuf {
    std::env::var_os("CODELOOP_WORK_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("codeloop"))
}

/// Ensure the directories codeloop writes to exist.
pub async fn ensure_dirs() -> anyhow::Result<()> {
    tokio::fs::create_dir_all(work_dir()).await?;
    Ok(())
}
