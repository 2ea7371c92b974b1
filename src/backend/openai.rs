//! Backend for OpenAI-compatible chat APIs with function calling.
//!
//! Endpoint: `/v1/chat/completions`.
//! Streaming: SSE with `data: {"choices": [{"delta": {...}}]}`; content
//! deltas are forwarded as tokens, `function_call` deltas are accumulated.

use super::sse::SseDecoder;
use super::{Backend, ChatRequest, ChatResponse, FunctionCall, Reply, TokenUsage};
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

/// Backend for any OpenAI-compatible API that supports `functions`.
///
/// The per-request key from the generator settings wins over the key set on
/// the backend. A request with neither is rejected before any HTTP traffic.
///
/// # Example
///
/// ```
/// use generator_pipeline::backend::OpenAiBackend;
///
/// let backend = OpenAiBackend::new();
/// let with_key = OpenAiBackend::new().with_api_key("sk-...");
/// assert!(with_key.has_api_key());
/// ```
#[derive(Clone, Default)]
pub struct OpenAiBackend {
    /// Fallback API key, sent as `Authorization: Bearer {key}`.
    pub(crate) api_key: Option<String>,
    /// Optional organization ID. If set, sent as `OpenAI-Organization: {org}`.
    pub(crate) organization: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("api_key", &self.api_key.as_deref().map(redact))
            .field("organization", &self.organization)
            .finish()
    }
}

fn redact(key: &str) -> String {
    match key.get(..6) {
        Some(prefix) if key.len() > 6 => format!("{}***", prefix),
        _ => "***".to_string(),
    }
}

impl OpenAiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the organization ID header.
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    /// Returns `true` if a fallback API key has been configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Build the request body for `/v1/chat/completions`.
    fn build_body(request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
        });

        if !request.functions.is_empty() {
            body["functions"] = json!(request.functions);
        }
        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }

        body
    }

    fn resolve_key<'a>(&'a self, request: &'a ChatRequest) -> Result<&'a str> {
        request
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .or(self.api_key.as_deref())
            .ok_or_else(|| PipelineError::InvalidConfig("No OpenAI API key provided".to_string()))
    }

    fn build_http_request(
        &self,
        client: &Client,
        url: &str,
        key: &str,
        body: &Value,
    ) -> reqwest::RequestBuilder {
        let mut req = client
            .post(url)
            .header("Authorization", format!("Bearer {}", key))
            .json(body);
        if let Some(ref org) = self.organization {
            req = req.header("OpenAI-Organization", org.as_str());
        }
        req
    }

    async fn send(
        &self,
        client: &Client,
        base_url: &str,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let key = self.resolve_key(request)?;
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
        let body = Self::build_body(request, stream);

        let resp = self
            .build_http_request(client, &url, key, &body)
            .send()
            .await
            .map_err(|e| {
                PipelineError::Other(format!("Failed to connect to LLM at {}: {}", url, e))
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::HttpError { status, body: text });
        }
        Ok(resp)
    }

    /// Pull the reply out of a non-streaming response body.
    fn parse_reply(json_resp: &Value) -> Result<Reply> {
        let message = json_resp
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| PipelineError::Other("LLM response has no message".to_string()))?;

        if let Some(call) = message.get("function_call").filter(|v| !v.is_null()) {
            return Ok(Reply::FunctionCall(serde_json::from_value(call.clone())?));
        }

        let text = message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        Ok(Reply::Content(text))
    }

    fn parse_usage(json_resp: &Value) -> TokenUsage {
        json_resp
            .get("usage")
            .filter(|v| !v.is_null())
            .and_then(|u| serde_json::from_value(u.clone()).ok())
            .unwrap_or_default()
    }
}

/// Accumulates streamed deltas into a final reply.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    call_name: String,
    call_arguments: String,
    usage: TokenUsage,
}

impl StreamAccumulator {
    fn apply(&mut self, chunk: &Value, on_token: &mut (dyn FnMut(String) + Send)) {
        if let Some(usage) = chunk.get("usage").filter(|v| !v.is_null()) {
            if let Ok(usage) = serde_json::from_value(usage.clone()) {
                self.usage = usage;
            }
        }

        let Some(delta) = chunk
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
        else {
            return;
        };

        if let Some(content) = delta.get("content").and_then(|v| v.as_str()) {
            if !content.is_empty() {
                self.content.push_str(content);
                on_token(content.to_string());
            }
        }
        if let Some(call) = delta.get("function_call") {
            if let Some(name) = call.get("name").and_then(|v| v.as_str()) {
                self.call_name.push_str(name);
            }
            if let Some(args) = call.get("arguments").and_then(|v| v.as_str()) {
                self.call_arguments.push_str(args);
            }
        }
    }

    fn finish(self) -> (Reply, TokenUsage) {
        let reply = if self.call_name.is_empty() {
            Reply::Content(self.content)
        } else {
            Reply::FunctionCall(FunctionCall {
                name: self.call_name,
                arguments: self.call_arguments,
            })
        };
        (reply, self.usage)
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn chat(
        &self,
        client: &Client,
        base_url: &str,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        let resp = self.send(client, base_url, request, false).await?;
        let status = resp.status().as_u16();
        let json_resp: Value = resp.json().await?;

        Ok(ChatResponse {
            reply: Self::parse_reply(&json_resp)?,
            usage: Self::parse_usage(&json_resp),
            status,
        })
    }

    async fn chat_streaming(
        &self,
        client: &Client,
        base_url: &str,
        request: &ChatRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<ChatResponse> {
        let resp = self.send(client, base_url, request, true).await?;
        let status = resp.status().as_u16();

        let mut stream = resp.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut acc = StreamAccumulator::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(PipelineError::Request)?;
            for value in decoder.decode(&chunk) {
                acc.apply(&value, on_token);
            }
        }
        for value in decoder.flush() {
            acc.apply(&value, on_token);
        }

        let (reply, usage) = acc.finish();
        Ok(ChatResponse {
            reply,
            usage,
            status,
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
