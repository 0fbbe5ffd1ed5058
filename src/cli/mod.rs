// src/cli/mod.rs — CLI definition (clap derive)

pub mod doctor;
pub mod progress;
pub mod run;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "codeloop",
    about = "Generate a program from an assignment, building and refining until it compiles",
    version
)]
pub struct Cli {
    /// Assignment text (default command when no subcommand given)
    #[arg(trailing_var_arg = true)]
    pub task: Vec<String>,

    /// Run a QA session against the program once it builds
    #[arg(long)]
    pub qa: bool,

    /// Attempt budget (overrides loop.max_attempts)
    #[arg(short = 'n', long)]
    pub attempts: Option<usize>,

    /// Model to use (provider/model format)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Build on the host shell instead of a container
    #[arg(long)]
    pub local: bool,

    /// Print the result as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Suppress progress output (only emit final result)
    #[arg(long)]
    pub quiet: bool,

    /// Read assignment from stdin
    #[arg(long)]
    pub stdin: bool,

    /// Config file path
    #[arg(long)]
    pub config: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check config, build runtime and model providers
    Doctor,
}
