// src/main.rs — codeloop entry point

use clap::Parser;
use tokio::io::AsyncReadExt;

use codeloop::cli::run::{run_assignment, RunOptions};
use codeloop::cli::{Cli, Commands};
use codeloop::core::program::Overrides;
use codeloop::infra::config::Config;
use codeloop::infra::logger;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging (respects RUST_LOG)
    logger::init_logging(if cli.verbose { "debug" } else { "warn" });

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    // Load config (falls back to defaults if no config.toml)
    let config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };

    if let Some(Commands::Doctor) = cli.command {
        codeloop::cli::doctor::run_doctor(&config).await?;
        return Ok(true);
    }

    let assignment = if cli.stdin {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        cli.task.join(" ")
    };
    if assignment.trim().is_empty() {
        anyhow::bail!("no assignment given (pass it as arguments or use --stdin)");
    }

    let opts = RunOptions {
        qa: cli.qa,
        json: cli.json,
        quiet: cli.quiet,
        overrides: Overrides {
            model: cli.model,
            max_attempts: cli.attempts,
            local: cli.local,
        },
    };
    run_assignment(&assignment, &config, opts).await
}
