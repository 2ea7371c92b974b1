//! Backend trait and normalized chat request/response types.
//!
//! The [`Backend`] trait is the LLM transport capability: send messages and
//! function declarations, get back either an assistant message or a function
//! call, together with token usage. Built-in implementations:
//! [`OpenAiBackend`] and [`MockBackend`].
//!
//! ## Architecture
//!
//! ```text
//! CompletionDriver ──► ChatRequest ──► Backend::chat() ──► ChatResponse
//!                                           │
//!                                ┌──────────┴──────────┐
//!                          OpenAiBackend           MockBackend
//!                     /v1/chat/completions       canned replies
//!                         SSE streaming
//! ```

pub mod mock;
pub mod openai;
pub mod sse;

pub use mock::{MockBackend, MockReply};
pub use openai::OpenAiBackend;

use crate::error::Result;
use crate::function::FunctionDeclaration;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// A normalized chat request: provider-agnostic.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier (e.g. `"gpt-4"`).
    pub model: String,

    /// Full message sequence, in order.
    pub messages: Vec<ChatMessage>,

    /// Functions the model may call. Empty means no function calling.
    pub functions: Vec<FunctionDeclaration>,

    /// Per-request credential. Backends fall back to their own key.
    pub api_key: Option<String>,

    /// Whether to use the streaming endpoint.
    pub stream: bool,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message author.
    pub role: Role,
    /// The message content. `None` for assistant function-call turns.
    #[serde(default)]
    pub content: Option<String>,
    /// Function name, for `function` result turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The call the assistant made, for assistant function-call turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// The assistant turn recording a function call.
    pub fn function_call(call: FunctionCall) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            name: None,
            function_call: Some(call),
        }
    }

    /// The turn carrying a function's result back to the model.
    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: Some(content.into()),
            name: Some(name.into()),
            function_call: None,
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
            function_call: None,
        }
    }
}

/// The role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant (model) response.
    Assistant,
    /// Result of a function call.
    Function,
}

/// A function call emitted by the model. `arguments` is the raw JSON text
/// the model produced and may be malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Token counters reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// What the model answered with.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Plain assistant content.
    Content(String),
    /// The model selected a declared function.
    FunctionCall(FunctionCall),
}

/// A normalized chat response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub reply: Reply,
    pub usage: TokenUsage,
    /// HTTP status code (for diagnostics/logging).
    pub status: u16,
}

/// Abstraction over LLM providers.
///
/// Implementors translate between the normalized [`ChatRequest`]/[`ChatResponse`]
/// and the provider's HTTP API.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a non-streaming chat call.
    async fn chat(&self, client: &Client, base_url: &str, request: &ChatRequest)
        -> Result<ChatResponse>;

    /// Execute a streaming chat call.
    ///
    /// `on_token` is called for each content token as it arrives. The
    /// aggregate reply is still returned as a [`ChatResponse`].
    async fn chat_streaming(
        &self,
        client: &Client,
        base_url: &str,
        request: &ChatRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<ChatResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}
