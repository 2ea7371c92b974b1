//! Mock backend for testing without a live LLM.
//!
//! [`MockBackend`] returns pre-configured replies in order and records every
//! request it receives, allowing downstream consumers to write deterministic
//! tests against this crate.
//!
//! # Example
//!
//! ```
//! use generator_pipeline::backend::{MockBackend, MockReply};
//!
//! let mock = MockBackend::new(vec![
//!     MockReply::content(r#"{"bar": 1}"#),
//!     MockReply::content(r#"{"foo": "x"}"#),
//! ]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, ChatRequest, ChatResponse, FunctionCall, Reply, TokenUsage};
use crate::error::Result;
use crate::PipelineError;

/// One canned backend answer.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Assistant content with the given usage.
    Content { text: String, usage: TokenUsage },
    /// A function call with the given usage.
    FunctionCall { call: FunctionCall, usage: TokenUsage },
    /// A transport failure.
    Error(String),
}

impl MockReply {
    /// Content reply with zero usage.
    pub fn content(text: impl Into<String>) -> Self {
        MockReply::Content {
            text: text.into(),
            usage: TokenUsage::default(),
        }
    }

    /// Function-call reply with zero usage.
    pub fn function_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        MockReply::FunctionCall {
            call: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
            usage: TokenUsage::default(),
        }
    }

    /// Transport failure reply.
    pub fn error(message: impl Into<String>) -> Self {
        MockReply::Error(message.into())
    }

    /// Attach token usage to a content or function-call reply.
    pub fn with_usage(self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        let usage = TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        };
        match self {
            MockReply::Content { text, .. } => MockReply::Content { text, usage },
            MockReply::FunctionCall { call, .. } => MockReply::FunctionCall { call, usage },
            error => error,
        }
    }
}

/// A test backend that returns canned replies in order.
///
/// Cycles back to the beginning when all replies have been consumed.
/// For streaming, emits content as a single token.
#[derive(Debug)]
pub struct MockBackend {
    replies: Vec<MockReply>,
    index: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
}

impl MockBackend {
    /// Create a mock backend with the given canned replies.
    ///
    /// Replies are returned in order. When exhausted, cycles from the beginning.
    pub fn new(replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "MockBackend requires at least one reply");
        Self {
            replies,
            index: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Create a mock that always returns the same content.
    pub fn fixed(text: impl Into<String>) -> Self {
        Self::new(vec![MockReply::content(text)])
    }

    /// Sleep before every reply (for timeout tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls received so far.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    /// Copies of every request received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    async fn next_reply(&self, request: &ChatRequest) -> Result<ChatResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.replies[idx].clone() {
            MockReply::Content { text, usage } => Ok(ChatResponse {
                reply: Reply::Content(text),
                usage,
                status: 200,
            }),
            MockReply::FunctionCall { call, usage } => Ok(ChatResponse {
                reply: Reply::FunctionCall(call),
                usage,
                status: 200,
            }),
            MockReply::Error(message) => Err(PipelineError::HttpError {
                status: 500,
                body: message,
            }),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn chat(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        self.next_reply(request).await
    }

    async fn chat_streaming(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &ChatRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<ChatResponse> {
        let response = self.next_reply(request).await?;
        if let Reply::Content(ref text) = response.reply {
            on_token(text.clone());
        }
        Ok(response)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
