// src/provider/anthropic.rs — Anthropic Messages API provider

use async_trait::async_trait;
use serde::Serialize;

use super::{
    ChatRequest, ChatResponse, Message, ModelInfo, ModelProvider, Role, StopReason, TokenUsage,
    ToolCall,
};
use crate::infra::errors::CodeLoopError;

pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.anthropic.com".into(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the provider at a proxy or compatible gateway.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn request_body<'a>(&self, request: &'a ChatRequest) -> MessagesBody<'a> {
        MessagesBody {
            model: &request.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: request.system.as_deref(),
            temperature: request.temperature,
            messages: request
                .messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(message_to_json)
                .collect(),
            tools: request
                .tools
                .iter()
                .map(|t| ToolSchema {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.parameters,
                })
                .collect(),
        }
    }

    fn failure(&self, message: impl Into<String>, retriable: bool) -> CodeLoopError {
        CodeLoopError::Provider {
            provider: self.id().into(),
            message: message.into(),
            retriable,
        }
    }
}

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Seconds to wait on a 429 that carries no usable retry-after header.
const FALLBACK_RETRY_SECS: u64 = 5;

const CATALOG: &[(&str, &str)] = &[
    ("claude-sonnet-4-20250514", "Claude Sonnet 4"),
    ("claude-opus-4-20250514", "Claude Opus 4"),
    ("claude-haiku-3-5-20241022", "Claude 3.5 Haiku"),
];

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSchema<'a>>,
}

#[derive(Serialize)]
struct ToolSchema<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

/// Anthropic wants tool calls and tool results as typed content blocks.
fn message_to_json(m: &Message) -> serde_json::Value {
    match m.role {
        Role::Tool => serde_json::json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                "content": m.content,
            }],
        }),
        Role::Assistant if !m.tool_calls.is_empty() => {
            let mut blocks = Vec::new();
            if !m.content.is_empty() {
                blocks.push(serde_json::json!({ "type": "text", "text": m.content }));
            }
            for tc in &m.tool_calls {
                blocks.push(serde_json::json!({
                    "type": "tool_use",
                    "id": tc.id,
                    "name": tc.name,
                    "input": tc.arguments,
                }));
            }
            serde_json::json!({ "role": "assistant", "content": blocks })
        }
        Role::Assistant => serde_json::json!({ "role": "assistant", "content": m.content }),
        Role::User | Role::System => serde_json::json!({ "role": "user", "content": m.content }),
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn name(&self) -> &str {
        "Anthropic"
    }

    fn models(&self) -> Vec<ModelInfo> {
        CATALOG
            .iter()
            .map(|&(id, name)| ModelInfo::new(id, name))
            .collect()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, CodeLoopError> {
        let response = self
            .client
            .post(self.api_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|e| self.failure(e.to_string(), e.is_timeout() || e.is_connect()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CodeLoopError::RateLimited {
                provider: self.id().into(),
                retry_after_ms: retry_after_ms(response.headers()),
            });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(self.failure(format!("HTTP {status}: {detail}"), status.is_server_error()));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.failure(format!("unreadable response: {e}"), false))?;
        Ok(parse_response(&payload))
    }
}

/// Retry-After in milliseconds; delta-seconds form only.
fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok()?.trim().parse::<u64>().ok())
        .unwrap_or(FALLBACK_RETRY_SECS)
        .saturating_mul(1000)
}

fn parse_response(resp: &serde_json::Value) -> ChatResponse {
    let empty = Vec::new();
    let blocks = resp["content"].as_array().unwrap_or(&empty);

    let content = blocks
        .iter()
        .filter(|c| c["type"] == "text")
        .map(|c| c["text"].as_str().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("");

    let tool_calls = blocks
        .iter()
        .filter(|c| c["type"] == "tool_use")
        .map(|c| ToolCall {
            id: c["id"].as_str().unwrap_or("").to_string(),
            name: c["name"].as_str().unwrap_or("").to_string(),
            arguments: c["input"].clone(),
        })
        .collect();

    let usage = TokenUsage {
        input_tokens: resp["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: resp["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
    };

    let stop_reason = match resp["stop_reason"].as_str() {
        Some("end_turn") => StopReason::EndTurn,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("tool_use") => StopReason::ToolUse,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::Unknown,
    };

    ChatResponse {
        content,
        tool_calls,
        usage,
        stop_reason,
    }
}
