// src/provider/ollama.rs — Local models served by Ollama

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    ChatRequest, ChatResponse, Message, ModelInfo, ModelProvider, Role, StopReason, TokenUsage,
    ToolCall,
};
use crate::infra::errors::CodeLoopError;

const DEFAULT_HOST: &str = "http://localhost:11434";
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Installed-model name fragments, best coder first.
const PREFERRED: &[&str] = &[
    "qwen2.5-coder",
    "codestral",
    "deepseek-coder-v2",
    "llama3.3",
    "llama3.1",
    "mistral",
];
const FALLBACK_MODEL: &str = "llama3.3";

pub struct OllamaProvider {
    host: String,
    client: reqwest::Client,
    installed: Vec<String>,
}

#[derive(Deserialize)]
struct Tags {
    #[serde(default)]
    models: Vec<Tag>,
}

#[derive(Deserialize)]
struct Tag {
    name: String,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<serde_json::Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Sampling::is_unset")]
    options: Sampling,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

#[derive(Serialize, Default)]
struct Sampling {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl Sampling {
    fn is_unset(&self) -> bool {
        self.temperature.is_none() && self.num_predict.is_none()
    }
}

impl OllamaProvider {
    pub fn new(host: Option<String>) -> Self {
        Self {
            host: host
                .map(|h| h.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_HOST.into()),
            client: reqwest::Client::new(),
            installed: Vec::new(),
        }
    }

    /// List installed models. Fails fast when no server is listening.
    pub async fn probe(&mut self) -> Result<Vec<String>, CodeLoopError> {
        let tags: Tags = self
            .client
            .get(format!("{}/api/tags", self.host))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.failure(format!("no server at {}: {e}", self.host), false))?
            .json()
            .await
            .map_err(|e| self.failure(format!("unexpected /api/tags payload: {e}"), false))?;

        self.installed = tags.models.into_iter().map(|t| t.name).collect();
        Ok(self.installed.clone())
    }

    pub fn pick_best_model(models: &[String]) -> String {
        PREFERRED
            .iter()
            .find_map(|want| models.iter().find(|m| m.contains(want)))
            .or_else(|| models.first())
            .cloned()
            .unwrap_or_else(|| FALLBACK_MODEL.into())
    }

    fn request_body<'a>(&self, request: &'a ChatRequest) -> ChatBody<'a> {
        let system = request
            .system
            .as_ref()
            .map(|s| serde_json::json!({ "role": "system", "content": s }));
        ChatBody {
            model: &request.model,
            messages: system
                .into_iter()
                .chain(request.messages.iter().map(message_to_json))
                .collect(),
            stream: false,
            options: Sampling {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
            tools: request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect(),
        }
    }

    fn failure(&self, message: impl Into<String>, retriable: bool) -> CodeLoopError {
        CodeLoopError::Provider {
            provider: "ollama".into(),
            message: message.into(),
            retriable,
        }
    }
}

fn message_to_json(m: &Message) -> serde_json::Value {
    let role = match m.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    };
    let mut msg = serde_json::json!({ "role": role, "content": m.content });
    if !m.tool_calls.is_empty() {
        let calls: Vec<serde_json::Value> = m
            .tool_calls
            .iter()
            .map(|tc| serde_json::json!({ "function": { "name": tc.name, "arguments": tc.arguments } }))
            .collect();
        msg["tool_calls"] = serde_json::json!(calls);
    }
    msg
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn id(&self) -> &str {
        "ollama"
    }

    fn name(&self) -> &str {
        "Ollama"
    }

    fn models(&self) -> Vec<ModelInfo> {
        self.installed
            .iter()
            .map(|name| ModelInfo::new(name.as_str(), name.as_str()))
            .collect()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, CodeLoopError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|e| self.failure(e.to_string(), e.is_timeout() || e.is_connect()))?;

        let status = response.status();
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

fn parse_response(resp: &serde_json::Value) -> ChatResponse {
    let content = resp["message"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string();

    // Ollama does not assign tool call ids; synthesize stable ones per response.
    let tool_calls: Vec<ToolCall> = resp["message"]["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(i, c)| ToolCall {
                    id: format!("call_{}", i),
                    name: c["function"]["name"].as_str().unwrap_or("").to_string(),
                    arguments: c["function"]["arguments"].clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = TokenUsage {
        input_tokens: resp["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
        output_tokens: resp["eval_count"].as_u64().unwrap_or(0) as u32,
    };

    let stop_reason = if tool_calls.is_empty() {
        StopReason::EndTurn
    } else {
        StopReason::ToolUse
    };

    ChatResponse {
        content,
        tool_calls,
        usage,
        stop_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_best_model_prefers_coder() {
        let models = vec!["llama3.1:8b".to_string(), "qwen2.5-coder:14b".to_string()];
        assert_eq!(OllamaProvider::pick_best_model(&models), "qwen2.5-coder:14b");
    }

    #[test]
    fn test_pick_best_model_empty() {
        assert_eq!(OllamaProvider::pick_best_model(&[]), "llama3.3");
    }

    #[test]
    fn test_request_body_includes_system_and_options() {
        let p = OllamaProvider::default();
        let req = ChatRequest {
            model: "qwen2.5-coder".into(),
            messages: vec![Message::user("hi")],
            system: Some("sys".into()),
            temperature: Some(0.1),
            max_tokens: Some(256),
            ..Default::default()
        };
        let body = serde_json::to_value(p.request_body(&req)).unwrap();
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(body["options"]["num_predict"], 256);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_request_body_omits_unset_options() {
        let p = OllamaProvider::new(Some("http://gpu-box:11434/".into()));
        let req = ChatRequest {
            model: "codestral".into(),
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let body = serde_json::to_value(p.request_body(&req)).unwrap();
        assert!(body.get("options").is_none());
        assert!(body.get("tools").is_none());
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(p.host, "http://gpu-box:11434");
    }

    #[test]
    fn test_parse_response_tool_calls() {
        let resp = serde_json::json!({
            "message": {
                "content": "",
                "tool_calls": [{"function": {"name": "finish", "arguments": {"findings": "ok"}}}]
            },
            "prompt_eval_count": 5,
            "eval_count": 3
        });
        let parsed = parse_response(&resp);
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].id, "call_0");
        assert_eq!(parsed.tool_calls[0].arguments["findings"], "ok");
        assert!(matches!(parsed.stop_reason, StopReason::ToolUse));
    }
}
