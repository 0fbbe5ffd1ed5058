// src/cli/doctor.rs — Environment diagnostics

use crate::infra::config::{Config, Runtime};
use crate::infra::paths;
use crate::provider::resolver;

pub async fn run_doctor(config: &Config) -> anyhow::Result<()> {
    println!("codeloop doctor v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config_path = paths::config_file_path();
    if config_path.exists() {
        println!("  Config: {}", config_path.display());
    } else {
        println!("  Config: {} (not found, using defaults)", config_path.display());
    }
    println!("  Work dir: {}", paths::work_dir().display());

    // Build runtime
    let tc = &config.toolchain;
    println!("  Runtime: {}", tc.runtime);
    match tc.runtime {
        Runtime::Docker => match which::which("docker") {
            Ok(path) => println!("    docker: {} (image {})", path.display(), tc.image),
            Err(_) => println!("    WARN: docker not found in PATH (use --local to build on the host)"),
        },
        Runtime::Local => match which::which("sh") {
            Ok(path) => println!("    shell: {}", path.display()),
            Err(_) => println!("    WARN: sh not found in PATH"),
        },
    }
    println!("    entry: {}", tc.entry_path);
    println!("    build: {}", tc.build_command);

    // Providers
    print!("  Checking providers... ");
    let providers = resolver::discover_providers().await;
    if providers.is_empty() {
        println!("NONE FOUND");
        println!("    Set ANTHROPIC_API_KEY or start a local Ollama server.");
    } else {
        println!("{} found", providers.len());
        for p in &providers {
            println!("    {} ({} model(s))", p.id(), p.models().len());
        }
        match resolver::resolve(&providers, config.models.generator.as_deref()) {
            Ok((_, model)) => println!("    generator model: {}", model),
            Err(e) => println!("    WARN: {}", e),
        }
    }

    Ok(())
}
