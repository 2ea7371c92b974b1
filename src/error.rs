use crate::meta::RunMeta;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the generation pipeline and its components.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Misconfiguration: unknown module, missing credential, module invoked
    /// under a phase it does not implement.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP error with status code and response body.
    ///
    /// Returned by [`Backend`](crate::backend::Backend) implementations when
    /// the provider returns a non-success status code.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 401, 404, 500).
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The LLM call failed. Never retried.
    #[error("Completion failed: {0}")]
    Transport(String),

    /// A module rejected the run. The message is already formatted as
    /// `"<ModuleName> - <detail>"`.
    #[error("{0}")]
    Module(String),

    /// The final completion could not be decoded as JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// An endpoint function could not be executed.
    #[error("Function '{function}' failed: {message}")]
    ExternalCall { function: String, message: String },

    /// A single LLM call exceeded the configured timeout.
    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    /// The model kept chaining functions past the configured hop limit.
    #[error("Function chain exceeded {0} hops")]
    ChainLimit(usize),

    /// Retryable failures kept happening until the retry bound ran out.
    #[error("Max retries reached")]
    MaxRetries {
        /// Total attempts performed, including the first one.
        attempts: u32,
        /// Message of the failure that triggered the last retry.
        last_error: String,
    },

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// `true` for the terminal "max retries reached" error, so callers can
    /// tell transient exhaustion apart from configuration or validation faults.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, PipelineError::MaxRetries { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure of a whole [`generate`](crate::generate) call.
///
/// Carries the run metadata accumulated up to the failure, so the per-module
/// audit trail and the cost spent so far survive the error.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct GenerationError {
    #[source]
    pub error: PipelineError,
    pub meta: Box<RunMeta>,
}

impl GenerationError {
    pub fn new(error: PipelineError, meta: RunMeta) -> Self {
        Self {
            error,
            meta: Box::new(meta),
        }
    }
}
