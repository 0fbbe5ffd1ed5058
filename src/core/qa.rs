// src/core/qa.rs — Post-success QA session

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::prompt::Prompts;
use super::truncation::truncate_output;
use super::types::{Assignment, ProcessOutput, QaReport, QaStep};
use super::workspace::{Sandbox, Workspace};
use crate::infra::config::QaConfig;
use crate::infra::errors::CodeLoopError;
use crate::provider::{ChatRequest, Message, ModelProvider, ToolCall, ToolDef};

const RUN_COMMAND: &str = "run_command";
const FINISH: &str = "finish";

/// Exercises a successfully built workspace and reports findings.
///
/// Advisory only. An agent gets its own session; it never sees the
/// generator's conversation.
#[async_trait]
pub trait QaAgent: Send + Sync {
    async fn evaluate(
        &self,
        assignment: &Assignment,
        workspace: &Workspace,
    ) -> Result<QaReport, CodeLoopError>;

    /// `evaluate`, calling `on_step` with each step as it completes.
    /// Agents that cannot report live replay the finished report's steps.
    async fn evaluate_observed(
        &self,
        assignment: &Assignment,
        workspace: &Workspace,
        on_step: &(dyn for<'s> Fn(&'s QaStep) + Send + Sync),
    ) -> Result<QaReport, CodeLoopError> {
        let report = self.evaluate(assignment, workspace).await?;
        for step in &report.steps {
            on_step(step);
        }
        Ok(report)
    }
}

/// QA agent driving a chat model through `run_command` / `finish` tools.
pub struct LlmQaAgent {
    provider: Arc<dyn ModelProvider>,
    model: String,
    prompts: Prompts,
    max_steps: u32,
    command_timeout: Duration,
    max_output_bytes: usize,
    max_tokens: u32,
}

impl LlmQaAgent {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        model: impl Into<String>,
    ) -> Result<Self, CodeLoopError> {
        Self::from_config(provider, model, &QaConfig::default())
    }

    pub fn from_config(
        provider: Arc<dyn ModelProvider>,
        model: impl Into<String>,
        cfg: &QaConfig,
    ) -> Result<Self, CodeLoopError> {
        Ok(Self {
            provider,
            model: model.into(),
            prompts: Prompts::new()?,
            max_steps: cfg.max_steps,
            command_timeout: Duration::from_secs(cfg.command_timeout_seconds.max(1)),
            max_output_bytes: cfg.max_output_bytes,
            max_tokens: 4096,
        })
    }

    fn tools() -> Vec<ToolDef> {
        vec![
            ToolDef {
                name: RUN_COMMAND.into(),
                description: "Run a shell command in the program's source directory. \
                              Returns the exit status and combined output."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "command": { "type": "string", "description": "Command for sh -c" }
                    },
                    "required": ["command"]
                }),
            },
            ToolDef {
                name: FINISH.into(),
                description: "End the session with your findings.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "findings": { "type": "string" }
                    },
                    "required": ["findings"]
                }),
            },
        ]
    }

    fn record(&self, command: &str, output: ProcessOutput) -> QaStep {
        let truncated = truncate_output(&output.output, self.max_output_bytes);
        if truncated.was_truncated {
            tracing::debug!(
                command,
                original_bytes = truncated.original_bytes,
                original_lines = truncated.original_lines,
                "Truncated QA command output"
            );
        }
        QaStep {
            command: command.to_string(),
            output: truncated.content,
            exit_status: output.exit_status,
        }
    }

    /// Tool loop. Returns the findings and whether the model concluded on its own.
    async fn session(
        &self,
        sandbox: &Sandbox,
        system: String,
        mut messages: Vec<Message>,
        steps: &mut Vec<QaStep>,
        on_step: &(dyn for<'s> Fn(&'s QaStep) + Send + Sync),
    ) -> Result<(String, bool), CodeLoopError> {
        let tools = Self::tools();
        let mut commands_run: u32 = 0;
        let max_rounds = self.max_steps as usize + 2;

        for _round in 0..max_rounds {
            let request = ChatRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                max_tokens: Some(self.max_tokens),
                temperature: Some(0.0),
                system: Some(system.clone()),
            };
            let response = self.provider.chat(request).await?;

            if response.tool_calls.is_empty() {
                return Ok((response.content, true));
            }

            messages.push(Message::assistant_with_tool_calls(
                &response.content,
                response.tool_calls.clone(),
            ));

            let mut findings = None;
            for tc in &response.tool_calls {
                let reply = match tc.name.as_str() {
                    FINISH => {
                        findings = Some(
                            string_arg(tc, "findings")
                                .unwrap_or_else(|| response.content.clone()),
                        );
                        "Session finished.".to_string()
                    }
                    RUN_COMMAND => match string_arg(tc, "command") {
                        None => "error: missing 'command' argument".to_string(),
                        Some(_) if commands_run >= self.max_steps => format!(
                            "Command budget of {} exhausted. Call finish with your findings now.",
                            self.max_steps
                        ),
                        Some(command) => {
                            commands_run += 1;
                            tracing::debug!(step = commands_run, %command, "QA command");
                            let output = sandbox.exec(&command, self.command_timeout).await?;
                            let step = self.record(&command, output);
                            let reply = tool_reply(&step);
                            on_step(&step);
                            steps.push(step);
                            reply
                        }
                    },
                    other => format!("error: unknown tool '{}'", other),
                };
                messages.push(Message::tool_result(&tc.id, reply));
            }

            if let Some(findings) = findings {
                return Ok((findings, true));
            }
        }

        Ok((
            format!(
                "QA session ended after {} rounds without findings.",
                max_rounds
            ),
            false,
        ))
    }
}

#[async_trait]
impl QaAgent for LlmQaAgent {
    async fn evaluate(
        &self,
        assignment: &Assignment,
        workspace: &Workspace,
    ) -> Result<QaReport, CodeLoopError> {
        self.evaluate_observed(assignment, workspace, &|_: &QaStep| {})
            .await
    }

    async fn evaluate_observed(
        &self,
        assignment: &Assignment,
        workspace: &Workspace,
        on_step: &(dyn for<'s> Fn(&'s QaStep) + Send + Sync),
    ) -> Result<QaReport, CodeLoopError> {
        let sandbox = workspace
            .open_sandbox()
            .await
            .map_err(|e| CodeLoopError::QaFailure(format!("cannot open sandbox: {}", e)))?;

        // The build always comes first so later commands can run the artifact.
        let spec = sandbox.spec().clone();
        let build = sandbox
            .build()
            .await
            .map_err(|e| CodeLoopError::QaFailure(format!("sandbox build failed: {}", e)))?;
        let build_step = self.record(&spec.build_command, build.clone());
        on_step(&build_step);
        let mut steps = vec![build_step];

        let system = self.prompts.qa_system(&spec, self.max_steps)?;
        let user = self.prompts.qa_user(
            assignment.text(),
            workspace.source(),
            &spec,
            &ProcessOutput {
                output: steps[0].output.clone(),
                ..build
            },
        )?;

        match self
            .session(&sandbox, system, vec![Message::user(user)], &mut steps, on_step)
            .await
        {
            Ok((findings, complete)) => Ok(QaReport {
                steps,
                findings,
                complete,
            }),
            Err(e) => {
                tracing::warn!("QA session aborted after {} step(s): {}", steps.len(), e);
                Ok(QaReport {
                    steps,
                    findings: format!("QA session aborted: {}", e),
                    complete: false,
                })
            }
        }
    }
}

fn string_arg(tc: &ToolCall, key: &str) -> Option<String> {
    tc.arguments
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn tool_reply(step: &QaStep) -> String {
    let status = match step.exit_status {
        Some(code) => format!("exit status {}", code),
        None => "killed (timeout)".to_string(),
    };
    format!("{}\n{}", status, step.output)
}
