// src/cli/progress.rs — Terminal progress renderer for real-time loop feedback

use crate::core::types::{LoopState, ProgressEvent};

/// Build a progress callback that writes formatted output to stderr.
///
/// All progress output goes to stderr so stdout remains clean for the
/// generated source. Returns a closure suitable for `Orchestrator::with_progress()`.
pub fn terminal_progress() -> impl Fn(ProgressEvent) + Send + Sync + 'static {
    move |event| {
        if let Some(line) = format_event(&event) {
            eprintln!("{}", line);
        }
    }
}

/// One line per event. Routine state changes are left to the other events.
pub fn format_event(event: &ProgressEvent) -> Option<String> {
    let line = match event {
        ProgressEvent::StateChanged { to, .. } => match to {
            LoopState::Refining => "[loop] build failed, refining".to_string(),
            LoopState::Failed => "[loop] failed".to_string(),
            _ => return None,
        },
        ProgressEvent::AttemptStarted {
            attempt,
            max_attempts,
        } => format!("[attempt {}/{}] generating...", attempt, max_attempts),
        ProgressEvent::BuildFinished {
            attempt,
            succeeded,
            exit_status,
        } => {
            let status = exit_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "killed".into());
            let verdict = if *succeeded { "passed" } else { "FAILED" };
            format!("[attempt {}] build {} (exit {})", attempt, verdict, status)
        }
        ProgressEvent::QaStep {
            command,
            exit_status,
        } => {
            let status = exit_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "killed".into());
            format!("[qa]   $ {} (exit {})", command, status)
        }
        ProgressEvent::Finished {
            succeeded,
            attempts,
            elapsed,
        } => format!(
            "[done] {} after {} attempt(s) in {:.1}s",
            if *succeeded { "succeeded" } else { "failed" },
            attempts,
            elapsed.as_secs_f64(),
        ),
    };
    Some(line)
}
