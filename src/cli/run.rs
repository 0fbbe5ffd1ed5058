// src/cli/run.rs — Default command: generate a program for an assignment

use tokio_util::sync::CancellationToken;

use super::progress::terminal_progress;
use crate::core::program::{CodeLoop, Overrides, ProgramOutput};
use crate::infra::config::Config;
use crate::infra::paths;

pub struct RunOptions {
    pub qa: bool,
    pub json: bool,
    pub quiet: bool,
    pub overrides: Overrides,
}

/// Run the loop and print the result. Returns whether the build succeeded.
pub async fn run_assignment(
    assignment: &str,
    config: &Config,
    opts: RunOptions,
) -> anyhow::Result<bool> {
    paths::ensure_dirs().await?;

    let mut codeloop = CodeLoop::from_config(config, &opts.overrides).await?;
    if !opts.quiet && !opts.json {
        codeloop = codeloop.with_progress(terminal_progress());
    }

    // Ctrl-C cancels the in-flight generate or build step.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let output = match codeloop
        .generate_program_with_cancel(assignment, opts.qa, &cancel)
        .await
    {
        Ok(output) => output,
        Err(e) => {
            if let Some(diagnostics) = e.diagnostics().filter(|d| !d.trim().is_empty()) {
                eprintln!("# Last build output\n\n{}", diagnostics.trim_end());
            }
            return Err(e.into());
        }
    };

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_output(&output, opts.quiet);
    }
    Ok(output.succeeded)
}

fn print_output(output: &ProgramOutput, quiet: bool) {
    if !output.final_source.is_empty() {
        print!("{}", output.final_source);
        if !output.final_source.ends_with('\n') {
            println!();
        }
    }
    if let Some(ref report) = output.qa_report {
        eprintln!("\n# QA report\n\n{}", report);
    }
    if let Some(ref error) = output.error {
        eprintln!("error: {}", error);
    } else if !quiet {
        eprintln!(
            "Build passed after {} attempt(s).",
            output.attempt_count
        );
    }
}
