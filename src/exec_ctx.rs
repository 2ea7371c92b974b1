//! Execution context shared across generation runs.
//!
//! [`ExecCtx`] carries the HTTP client, LLM backend, moderation capability,
//! retry policy, timeouts and optional event handler. Build it once at
//! startup and share it across requests; nothing in it is mutated by a run.

use crate::backend::{Backend, OpenAiBackend};
use crate::events::EventHandler;
use crate::moderation::Moderator;
use crate::retry::RetryConfig;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Default HTTP client timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on model-invoked function chain hops.
pub const DEFAULT_MAX_CHAIN_HOPS: usize = 8;

/// Shared execution context for generation runs.
///
/// # Example
///
/// ```
/// use generator_pipeline::{ExecCtx, RetryConfig};
/// use std::time::Duration;
///
/// let ctx = ExecCtx::builder("https://api.openai.com/v1")
///     .retry(RetryConfig::new(2))
///     .call_timeout(Duration::from_secs(30))
///     .build();
/// assert_eq!(ctx.base_url, "https://api.openai.com");
/// ```
pub struct ExecCtx {
    /// HTTP client (cheap to clone -- uses `Arc` internally). Also used for
    /// endpoint functions and moderation.
    pub client: Client,
    /// Base URL for the LLM provider.
    pub base_url: String,
    /// LLM backend. Default: [`OpenAiBackend`].
    pub backend: Arc<dyn Backend>,
    /// Moderation capability used by the `moderation` module.
    pub moderator: Option<Arc<dyn Moderator>>,
    /// Whole-run retry policy.
    pub retry: RetryConfig,
    /// Upper bound for a single LLM call. `None` leaves it to the HTTP client.
    pub call_timeout: Option<Duration>,
    /// Maximum number of chained function hops per completion.
    pub max_chain_hops: usize,
    /// Optional event handler for streaming tokens and lifecycle events.
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtx {
    /// Create a new builder.
    pub fn builder(base_url: impl Into<String>) -> ExecCtxBuilder {
        ExecCtxBuilder {
            client: None,
            base_url: base_url.into(),
            backend: None,
            moderator: None,
            retry: None,
            call_timeout: None,
            max_chain_hops: None,
            event_handler: None,
            timeout: None,
        }
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("base_url", &self.base_url)
            .field("backend", &self.backend.name())
            .field("moderator", &self.moderator.as_ref().map(|m| m.name()))
            .field("retry", &self.retry)
            .field("call_timeout", &self.call_timeout)
            .field("max_chain_hops", &self.max_chain_hops)
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`ExecCtx`].
pub struct ExecCtxBuilder {
    client: Option<Client>,
    base_url: String,
    backend: Option<Arc<dyn Backend>>,
    moderator: Option<Arc<dyn Moderator>>,
    retry: Option<RetryConfig>,
    call_timeout: Option<Duration>,
    max_chain_hops: Option<usize>,
    event_handler: Option<Arc<dyn EventHandler>>,
    timeout: Option<Duration>,
}

impl ExecCtxBuilder {
    /// Set the HTTP client. If not set, a default client is created.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the LLM backend. Default: [`OpenAiBackend`] without a fallback key.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use the OpenAI-compatible backend with a fallback API key.
    pub fn openai_with_key(mut self, api_key: impl Into<String>) -> Self {
        self.backend = Some(Arc::new(OpenAiBackend::new().with_api_key(api_key)));
        self
    }

    /// Set the moderation capability.
    pub fn moderator(mut self, moderator: Arc<dyn Moderator>) -> Self {
        self.moderator = Some(moderator);
        self
    }

    /// Set the whole-run retry policy. Default: [`RetryConfig::default()`].
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Bound every LLM call to `timeout`.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Set the function chain hop limit. Default: 8.
    pub fn max_chain_hops(mut self, hops: usize) -> Self {
        self.max_chain_hops = Some(hops);
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Set the HTTP client timeout. Default: 60 seconds.
    ///
    /// Ignored when a custom `Client` is provided via `.client()`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the execution context.
    pub fn build(self) -> ExecCtx {
        let timeout = self.timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT);
        let client = self.client.unwrap_or_else(|| {
            Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "falling back to default HTTP client");
                    Client::new()
                })
        });
        ExecCtx {
            client,
            base_url: normalize_base_url(&self.base_url),
            backend: self
                .backend
                .unwrap_or_else(|| Arc::new(OpenAiBackend::new())),
            moderator: self.moderator,
            retry: self.retry.unwrap_or_default(),
            call_timeout: self.call_timeout,
            max_chain_hops: self.max_chain_hops.unwrap_or(DEFAULT_MAX_CHAIN_HOPS),
            event_handler: self.event_handler,
        }
    }
}

/// Strip known provider path suffixes from a base URL, so the backend can
/// append its own path without doubling it.
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    for suffix in &["/v1/chat/completions", "/v1/chat", "/v1"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}
