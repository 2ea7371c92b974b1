//! Content moderation capability.
//!
//! [`Moderator`] is the consumed interface: submit text, get back a
//! [`ModerationVerdict`]. [`HttpModerator`] talks to a moderation service
//! over HTTP.

use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

/// Result of moderating one piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationVerdict {
    /// Service status; anything but `"success"` means the text was not moderated.
    pub status: String,
    pub flagged: bool,
    /// Label of the flagged category, when the service reports one.
    pub category: Option<String>,
}

impl ModerationVerdict {
    /// A successful, unflagged verdict.
    pub fn clean() -> Self {
        Self {
            status: "success".into(),
            flagged: false,
            category: None,
        }
    }

    /// A successful verdict flagging `category`.
    pub fn flagged(category: impl Into<String>) -> Self {
        Self {
            status: "success".into(),
            flagged: true,
            category: Some(category.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[async_trait]
pub trait Moderator: Send + Sync {
    async fn moderate(&self, client: &Client, text: &str) -> Result<ModerationVerdict>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Moderation over HTTP: `GET {endpoint}?value=<text>` with bearer auth.
///
/// The service answers `{"status": "success", "flagged": bool, "toxicity":
/// {"label": "..."}}`.
#[derive(Clone)]
pub struct HttpModerator {
    endpoint: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpModerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpModerator")
            .field("endpoint", &self.endpoint)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl HttpModerator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[derive(Deserialize)]
struct ModerationBody {
    #[serde(default)]
    status: String,
    #[serde(default)]
    flagged: bool,
    #[serde(default)]
    toxicity: Option<Value>,
    #[serde(default)]
    category: Option<String>,
}

impl From<ModerationBody> for ModerationVerdict {
    fn from(body: ModerationBody) -> Self {
        let category = body.category.or_else(|| {
            body.toxicity
                .as_ref()
                .and_then(|t| t.get("label"))
                .and_then(|l| l.as_str())
                .map(str::to_string)
        });
        Self {
            status: body.status,
            flagged: body.flagged,
            category,
        }
    }
}

#[async_trait]
impl Moderator for HttpModerator {
    async fn moderate(&self, client: &Client, text: &str) -> Result<ModerationVerdict> {
        let mut req = client.get(&self.endpoint).query(&[("value", text)]);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::HttpError { status, body });
        }

        let body: ModerationBody = resp.json().await?;
        Ok(body.into())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
