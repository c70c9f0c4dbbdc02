//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio and any other
//! endpoint that follows the OpenAI chat completions contract.

use std::collections::BTreeMap;

use crate::sse::{sse_response_stream, SseParser};
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::{build_client, from_reqwest, AuthHeader};
use serde_json::Value;
use solace_domain::config::{LlmConfig, ProviderConfig, ProviderKind};
use solace_domain::error::{Error, Result};
use solace_domain::stream::{BoxStream, StreamEvent, Usage};
use solace_domain::tool::{Message, ToolCall, ToolDefinition};

const AZURE_API_VERSION: &str = "2024-10-21";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM provider adapter for any OpenAI-compatible API endpoint.
///
/// Also handles Azure OpenAI, which uses the same wire format but with a
/// different URL pattern (`/openai/deployments/{model}/chat/completions`)
/// and auth header (`api-key` instead of `Authorization: Bearer`).
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    auth: Option<AuthHeader>,
    default_model: String,
    /// Bounded by the whole-request timeout.
    client: reqwest::Client,
    /// Connect timeout only; streamed bodies have no fixed deadline.
    stream_client: reqwest::Client,
    is_azure: bool,
}

impl OpenAiCompatProvider {
    /// Create a new provider from the deserialized provider config.
    pub fn from_config(cfg: &ProviderConfig, llm: &LlmConfig) -> Result<Self> {
        let is_azure = cfg.kind == ProviderKind::AzureOpenai;
        let (default_header, default_prefix) = if is_azure {
            ("api-key", "")
        } else {
            ("Authorization", "Bearer ")
        };
        let auth = AuthHeader::resolve(&cfg.auth, default_header, default_prefix)?;

        let default_model = cfg
            .default_model
            .clone()
            .unwrap_or_else(|| "gpt-4-turbo".into());

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            auth,
            default_model,
            client: build_client(llm.connect_timeout_ms, Some(llm.request_timeout_ms))?,
            stream_client: build_client(llm.connect_timeout_ms, None)?,
            is_azure,
        })
    }

    fn authed_post(&self, client: &reqwest::Client, url: &str) -> reqwest::RequestBuilder {
        AuthHeader::apply(self.auth.as_ref(), client.post(url))
            .header("Content-Type", "application/json")
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn chat_url(&self, req: &ChatRequest) -> String {
        if self.is_azure {
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version={AZURE_API_VERSION}",
                self.base_url,
                self.effective_model(req)
            )
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "messages": messages,
            "stream": stream,
        });

        // Azure embeds the deployment name in the URL.
        if !self.is_azure {
            body["model"] = Value::String(self.effective_model(req));
        }

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = Value::String("auto".into());
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    async fn send(
        &self,
        client: &reqwest::Client,
        req: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = self.chat_url(req);
        let body = self.build_chat_body(req, stream);

        tracing::debug!(provider = %self.id, url = %url, stream, "openai_compat request");

        let resp = self
            .authed_post(client, &url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }
        Ok(resp)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_openai(msg: &Message) -> Value {
    serde_json::json!({
        "role": msg.role.as_str(),
        "content": msg.content,
    })
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: provider.into(),
        message: "no message in choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(ChatResponse {
        content,
        tool_calls: parse_openai_tool_calls(message),
        usage: body.get("usage").and_then(parse_openai_usage),
        model,
        finish_reason,
    })
}

fn parse_openai_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(arr) = message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments").and_then(|a| a.as_str()).unwrap_or("{}");
            Some(ToolCall {
                call_id,
                tool_name,
                arguments: parse_arguments(args_str),
            })
        })
        .collect()
}

/// Malformed argument JSON becomes an empty object; the caller falls back
/// to defaults for every field.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default()))
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Assembles tool calls across chunks (keyed by `index`) and holds the
/// finish reason until usage or `[DONE]` arrives.
#[derive(Debug, Default)]
struct StreamState {
    calls: BTreeMap<u64, PendingCall>,
    finish_reason: Option<String>,
    done: bool,
}

impl StreamState {
    fn flush_calls(&mut self) -> Vec<Result<StreamEvent>> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(|c| {
                Ok(StreamEvent::ToolCallFinished {
                    arguments: parse_arguments(&c.arguments),
                    call_id: c.id,
                    tool_name: c.name,
                })
            })
            .collect()
    }

    fn finish_with(&mut self, usage: Option<Usage>) -> Vec<Result<StreamEvent>> {
        if self.done {
            return Vec::new();
        }
        let mut events = self.flush_calls();
        self.done = true;
        events.push(Ok(StreamEvent::Done {
            usage,
            finish_reason: self.finish_reason.take().or_else(|| Some("stop".into())),
        }));
        events
    }
}

impl SseParser for StreamState {
    fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data.trim() == "[DONE]" {
            return self.finish_with(None);
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        let Some(choice) = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
        else {
            // Usage-only trailer (stream_options.include_usage).
            return match v.get("usage").and_then(parse_openai_usage) {
                Some(usage) => self.finish_with(Some(usage)),
                None => Vec::new(),
            };
        };

        let mut events = Vec::new();
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Token {
                    text: text.to_string(),
                }));
            }
        }

        if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tc_arr {
                let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                let entry = self.calls.entry(index).or_default();
                let func = tc.get("function");

                if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                    entry.id = id.to_string();
                }
                if let Some(name) = func.and_then(|f| f.get("name")).and_then(|v| v.as_str()) {
                    entry.name.push_str(name);
                    events.push(Ok(StreamEvent::ToolCallStarted {
                        call_id: entry.id.clone(),
                        tool_name: entry.name.clone(),
                    }));
                }
                if let Some(args) = func
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                {
                    if !args.is_empty() {
                        entry.arguments.push_str(args);
                        events.push(Ok(StreamEvent::ToolCallDelta {
                            call_id: entry.id.clone(),
                            delta: args.to_string(),
                        }));
                    }
                }
            }
        }

        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            self.finish_reason = Some(fr.to_string());
            events.extend(self.flush_calls());
            // Some servers inline usage on the finishing chunk.
            if let Some(usage) = v.get("usage").and_then(parse_openai_usage) {
                events.extend(self.finish_with(Some(usage)));
            }
        }

        events
    }

    fn finish(&mut self) -> Vec<Result<StreamEvent>> {
        self.finish_with(None)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let resp = self.send(&self.client, req, false).await?;
        let resp_text = resp.text().await.map_err(from_reqwest)?;
        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&self.id, &resp_json)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let resp = self.send(&self.stream_client, req, true).await?;
        Ok(sse_response_stream(resp, StreamState::default()))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
