// src/core/types.rs — Core domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Natural-language description of the program to generate. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    text: Arc<str>,
}

impl Assignment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: Arc::from(text.into()),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Raw result of one command run inside a materialized tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// `None` when the process was killed (timeout, signal).
    pub exit_status: Option<i32>,
    /// Combined stdout + stderr.
    pub output: String,
    pub timed_out: bool,
}

/// Classified outcome of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub succeeded: bool,
    pub exit_status: Option<i32>,
    /// Full diagnostic text, verbatim.
    pub output: String,
}

/// One generate-then-build cycle. Never mutated once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub ordinal: usize,
    pub source: Arc<str>,
    pub build: BuildResult,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl Attempt {
    pub fn succeeded(&self) -> bool {
        self.build.succeeded
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// A command the QA session ran and what came back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaStep {
    pub command: String,
    pub output: String,
    pub exit_status: Option<i32>,
}

/// Advisory post-success report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaReport {
    pub steps: Vec<QaStep>,
    pub findings: String,
    /// False when the session ended early on an error.
    pub complete: bool,
}

impl QaReport {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.findings.trim().is_empty()
    }

    /// Plain-text rendering for hosts that only take a string.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            let status = step
                .exit_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "killed".into());
            out.push_str(&format!("## [{}] $ {} (exit {})\n", i + 1, step.command, status));
            out.push_str(step.output.trim_end());
            out.push_str("\n\n");
        }
        out.push_str("## Findings\n");
        if !self.complete {
            out.push_str("(QA session ended early; report is partial)\n");
        }
        out.push_str(self.findings.trim());
        out.push('\n');
        out
    }
}

/// States of the generate-build-refine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Init,
    Generating,
    Verifying,
    Refining,
    Succeeded,
    Failed,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Succeeded | LoopState::Failed)
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopState::Init => "init",
            LoopState::Generating => "generating",
            LoopState::Verifying => "verifying",
            LoopState::Refining => "refining",
            LoopState::Succeeded => "succeeded",
            LoopState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Real-time progress events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    StateChanged {
        from: LoopState,
        to: LoopState,
    },
    AttemptStarted {
        attempt: usize,
        max_attempts: usize,
    },
    BuildFinished {
        attempt: usize,
        succeeded: bool,
        exit_status: Option<i32>,
    },
    QaStep {
        command: String,
        exit_status: Option<i32>,
    },
    Finished {
        succeeded: bool,
        attempts: usize,
        elapsed: Duration,
    },
}

/// Tunables for one `Orchestrator::run`.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Whole-run deadline. `None` disables it.
    pub timeout: Option<Duration>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(900)),
        }
    }
}

impl From<&crate::infra::config::LoopSettings> for LoopConfig {
    fn from(cfg: &crate::infra::config::LoopSettings) -> Self {
        Self {
            timeout: (cfg.timeout_seconds > 0).then(|| Duration::from_secs(cfg.timeout_seconds)),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Assignment ─────────────────────────────────────────────

    #[test]
    fn test_assignment_new() {
        let a = Assignment::new("print the number 42 and exit 0");
        assert_eq!(a.text(), "print the number 42 and exit 0");
        assert!(!a.id.is_empty());
        assert!(!a.is_blank());
    }

    #[test]
    fn test_assignment_unique_ids() {
        assert_ne!(Assignment::new("A").id, Assignment::new("A").id);
    }

    #[test]
    fn test_assignment_blank() {
        assert!(Assignment::new("  \n\t").is_blank());
    }

    // ─── LoopState ──────────────────────────────────────────────

    #[test]
    fn test_terminal_states() {
        assert!(LoopState::Succeeded.is_terminal());
        assert!(LoopState::Failed.is_terminal());
        assert!(!LoopState::Refining.is_terminal());
        assert!(!LoopState::Init.is_terminal());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LoopState::Verifying.to_string(), "verifying");
    }

    // ─── QaReport ───────────────────────────────────────────────

    #[test]
    fn test_qa_report_render() {
        let report = QaReport {
            steps: vec![QaStep {
                command: "./app".into(),
                output: "42\n".into(),
                exit_status: Some(0),
            }],
            findings: "Prints 42 as required.".into(),
            complete: true,
        };
        let text = report.render();
        assert!(text.contains("$ ./app (exit 0)"));
        assert!(text.contains("42"));
        assert!(text.ends_with("Prints 42 as required.\n"));
        assert!(!text.contains("partial"));
    }

    #[test]
    fn test_qa_report_partial_marker() {
        let report = QaReport {
            steps: vec![],
            findings: String::new(),
            complete: false,
        };
        assert!(report.is_empty());
        assert!(report.render().contains("partial"));
    }

    // ─── LoopConfig ─────────────────────────────────────────────

    #[test]
    fn test_loop_config_zero_timeout_disables_deadline() {
        let settings = crate::infra::config::LoopSettings {
            timeout_seconds: 0,
            ..Default::default()
        };
        assert!(LoopConfig::from(&settings).timeout.is_none());
    }

    #[test]
    fn test_attempt_serializes_duration_as_millis() {
        let attempt = Attempt {
            ordinal: 0,
            source: Arc::from("fn main() {}"),
            build: BuildResult {
                succeeded: true,
                exit_status: Some(0),
                output: String::new(),
            },
            started_at: Utc::now(),
            duration: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&attempt).unwrap();
        assert_eq!(json["duration"], 1500);
        assert_eq!(json["source"], "fn main() {}");
    }
}
