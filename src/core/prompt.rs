// src/core/prompt.rs — Prompt templates and response parsing
//
// Templates are rendered with minijinja. Generator prompts carry the full
// build diagnostics of failed attempts; QA prompts describe the command tools.

use minijinja::{context, Environment};
use std::path::Path;

use super::toolchain::ToolchainSpec;
use super::types::{Attempt, ProcessOutput};
use crate::infra::errors::CodeLoopError;

const GENERATOR_SYSTEM: &str = r#"You are an expert programmer. You write complete, self-contained programs that compile on the first try.

The program lives in a single file, `{{ entry_path }}`{% if scaffold %}, next to these fixed files: {% for f in scaffold %}`{{ f }}`{% if not loop.last %}, {% endif %}{% endfor %}{% endif %}.
It is built with:

    {{ build_command }}
{% if image %}
The build runs inside the `{{ image }}` container image without network access.
{% endif %}{% if run_command %}
It will be run with `{{ run_command }}`.
{% endif %}
Reply with exactly one fenced code block holding the full contents of `{{ entry_path }}`. Do not write anything outside the block."#;

const ASSIGNMENT: &str = r#"# Assignment

{{ assignment }}"#;

const FEEDBACK: &str = r#"Attempt {{ ordinal + 1 }} failed to build{% if exit_status is none %} (the build was killed){% else %} (exit status {{ exit_status }}){% endif %}. Full build output:

```text
{{ diagnostics }}
```

Fix every error above and reply with the complete corrected `{{ entry_path }}`."#;

const QA_SYSTEM: &str = r#"You are a QA engineer reviewing a freshly built program against its assignment.

The source is `{{ entry_path }}`, built with `{{ build_command }}`.{% if run_command %} Run it with `{{ run_command }}`.{% endif %}

Use the `run_command` tool to inspect and exercise the program: run it, feed it inputs, probe edge cases. You may run at most {{ max_steps }} commands. Each command runs through `sh -c` in the source directory and you get back its exit status and output.

When you have seen enough, call `finish` with your findings: say whether each requirement of the assignment is met and describe any defect you observed."#;

const QA_USER: &str = r#"# Assignment

{{ assignment }}

# Source (`{{ entry_path }}`)

```{{ language }}
{{ source }}
```

# Build output ({% if build_status is none %}killed{% else %}exit status {{ build_status }}{% endif %})

```text
{{ build_output }}
```"#;

/// Compiled prompt templates.
pub struct Prompts {
    env: Environment<'static>,
}

impl Prompts {
    pub fn new() -> Result<Self, CodeLoopError> {
        let mut env = Environment::new();
        for (name, source) in [
            ("generator_system", GENERATOR_SYSTEM),
            ("assignment", ASSIGNMENT),
            ("feedback", FEEDBACK),
            ("qa_system", QA_SYSTEM),
            ("qa_user", QA_USER),
        ] {
            env.add_template(name, source).map_err(template_error)?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, CodeLoopError> {
        self.env
            .get_template(name)
            .and_then(|t| t.render(ctx))
            .map_err(template_error)
    }

    pub fn generator_system(&self, spec: &ToolchainSpec) -> Result<String, CodeLoopError> {
        let scaffold: Vec<String> = spec
            .scaffold
            .keys()
            .map(|p| p.display().to_string())
            .collect();
        self.render(
            "generator_system",
            context! {
                entry_path => spec.entry_path.display().to_string(),
                build_command => spec.build_command,
                run_command => spec.run_command,
                image => spec.image,
                scaffold => scaffold,
            },
        )
    }

    pub fn assignment(&self, assignment: &str) -> Result<String, CodeLoopError> {
        self.render("assignment", context! { assignment => assignment })
    }

    pub fn feedback(&self, attempt: &Attempt, spec: &ToolchainSpec) -> Result<String, CodeLoopError> {
        self.render(
            "feedback",
            context! {
                ordinal => attempt.ordinal,
                exit_status => attempt.build.exit_status,
                diagnostics => attempt.build.output.trim_end(),
                entry_path => spec.entry_path.display().to_string(),
            },
        )
    }

    pub fn qa_system(&self, spec: &ToolchainSpec, max_steps: u32) -> Result<String, CodeLoopError> {
        self.render(
            "qa_system",
            context! {
                entry_path => spec.entry_path.display().to_string(),
                build_command => spec.build_command,
                run_command => spec.run_command,
                max_steps => max_steps,
            },
        )
    }

    pub fn qa_user(
        &self,
        assignment: &str,
        source: &str,
        spec: &ToolchainSpec,
        build: &ProcessOutput,
    ) -> Result<String, CodeLoopError> {
        self.render(
            "qa_user",
            context! {
                assignment => assignment,
                entry_path => spec.entry_path.display().to_string(),
                language => language_hint(&spec.entry_path),
                source => source.trim_end(),
                build_status => build.exit_status,
                build_output => build.output.trim_end(),
            },
        )
    }
}

fn template_error(e: minijinja::Error) -> CodeLoopError {
    CodeLoopError::Other(anyhow::anyhow!("prompt template error: {}", e))
}

/// Fence language tag for a source file, by extension.
pub fn language_hint(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "rs" => "rust",
        "go" => "go",
        "py" => "python",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "js" | "mjs" => "javascript",
        "ts" => "typescript",
        "java" => "java",
        "zig" => "zig",
        "sh" => "sh",
        _ => "",
    }
}

/// Wrap source in a fence for echoing a previous attempt back to the model.
pub fn fence(source: &str, language: &str) -> String {
    format!("```{}\n{}\n```", language, source.trim_end())
}

/// Pull the program out of a model reply: the first fenced block, or the
/// whole reply when it has no fence. An unterminated fence runs to the end.
pub fn extract_source(reply: &str) -> String {
    let mut lines = reply.lines();
    let mut found_fence = false;
    for line in lines.by_ref() {
        if line.trim_start().starts_with("```") {
            found_fence = true;
            break;
        }
    }
    if !found_fence {
        return reply.trim().to_string();
    }

    let mut body = Vec::new();
    for line in lines {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    let mut source = body.join("\n");
    source.push('\n');
    source
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::BuildResult;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn spec() -> ToolchainSpec {
        ToolchainSpec::new("main.rs", "rustc -o app main.rs")
            .unwrap()
            .with_run_command("./app")
    }

    fn failed_attempt(diag: &str, exit_status: Option<i32>) -> Attempt {
        Attempt {
            ordinal: 0,
            source: Arc::from("fn main() { }}"),
            build: BuildResult {
                succeeded: false,
                exit_status,
                output: diag.into(),
            },
            started_at: Utc::now(),
            duration: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_extract_fenced_block() {
        let reply = "Here you go:\n```rust\nfn main() {\n    println!(\"42\");\n}\n```\nEnjoy.";
        assert_eq!(
            extract_source(reply),
            "fn main() {\n    println!(\"42\");\n}\n"
        );
    }

    #[test]
    fn test_extract_without_fence_uses_whole_reply() {
        assert_eq!(extract_source("  fn main() {}\n\n"), "fn main() {}");
    }

    #[test]
    fn test_extract_first_block_only() {
        let reply = "```go\npackage main\n```\n```\nignored\n```";
        assert_eq!(extract_source(reply), "package main\n");
    }

    #[test]
    fn test_extract_unterminated_fence() {
        assert_eq!(extract_source("```rust\nfn main() {}"), "fn main() {}\n");
    }

    #[test]
    fn test_language_hint() {
        assert_eq!(language_hint(Path::new("main.rs")), "rust");
        assert_eq!(language_hint(Path::new("cmd/app/main.go")), "go");
        assert_eq!(language_hint(Path::new("Makefile")), "");
    }

    #[test]
    fn test_generator_system_mentions_entry_and_build() {
        let prompts = Prompts::new().unwrap();
        let spec = spec().with_scaffold_file("Cargo.toml", "").unwrap();
        let text = prompts.generator_system(&spec).unwrap();
        assert!(text.contains("`main.rs`"));
        assert!(text.contains("rustc -o app main.rs"));
        assert!(text.contains("`Cargo.toml`"));
        assert!(text.contains("./app"));
        assert!(!text.contains("container image"));
    }

    #[test]
    fn test_feedback_carries_full_diagnostics() {
        let prompts = Prompts::new().unwrap();
        let diag = "error: unexpected token\n --> main.rs:1:14\n";
        let text = prompts
            .feedback(&failed_attempt(diag, Some(1)), &spec())
            .unwrap();
        assert!(text.starts_with("Attempt 1 failed to build (exit status 1)"));
        assert!(text.contains("error: unexpected token\n --> main.rs:1:14"));
    }

    #[test]
    fn test_feedback_for_killed_build() {
        let prompts = Prompts::new().unwrap();
        let text = prompts
            .feedback(&failed_attempt("command timed out after 300s", None), &spec())
            .unwrap();
        assert!(text.contains("(the build was killed)"));
    }

    #[test]
    fn test_qa_prompts() {
        let prompts = Prompts::new().unwrap();
        let system = prompts.qa_system(&spec(), 5).unwrap();
        assert!(system.contains("at most 5 commands"));

        let build = ProcessOutput {
            exit_status: Some(0),
            output: "ok\n".into(),
            timed_out: false,
        };
        let user = prompts
            .qa_user("print 42", "fn main() {}", &spec(), &build)
            .unwrap();
        assert!(user.contains("print 42"));
        assert!(user.contains("```rust\nfn main() {}\n```"));
        assert!(user.contains("exit status 0"));
    }

    #[test]
    fn test_fence() {
        assert_eq!(fence("fn main() {}\n", "rust"), "```rust\nfn main() {}\n```");
    }
}
