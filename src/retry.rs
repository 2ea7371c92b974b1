//! Whole-run retry on module rejection.
//!
//! [`generate`] is the crate's entry point. It runs the operator; when a
//! post module rejects the answer and asks for a retry, it waits
//! [`RetryConfig::delay`] and runs the whole pre → generate → post pass
//! again, up to the retry bound. Fatal failures are never retried.

use crate::error::GenerationError;
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::meta::RunMeta;
use crate::operator::{self, OperatorOutcome};
use crate::output::GenerationOutput;
use crate::types::GeneratorSpec;
use crate::PipelineError;
use std::time::Duration;
use tracing::instrument;

/// Default retry bound.
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Retry policy for [`generate`].
///
/// A spec's `settings.retries` overrides `max_retries` for that run.
///
/// # Example
///
/// ```
/// use generator_pipeline::retry::RetryConfig;
/// use std::time::Duration;
///
/// // Retry up to 2 times, 100ms apart
/// let config = RetryConfig::new(2).with_delay(Duration::from_millis(100));
/// assert_eq!(config.max_retries, 2);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retries (not counting the first attempt).
    pub max_retries: u32,
    /// Fixed pause before each retry.
    pub delay: Duration,
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// Run a generation to completion.
///
/// Every attempt carries the metadata of the previous ones, so `meta.cost`
/// and the module audit trail cover the whole run, on success and on error.
#[instrument(skip_all, fields(model = %spec.settings.model))]
pub async fn generate(
    ctx: &ExecCtx,
    spec: GeneratorSpec,
) -> Result<GenerationOutput, GenerationError> {
    let bound = spec.settings.retries.unwrap_or(ctx.retry.max_retries);
    let mut meta = RunMeta::new(spec.settings.model.clone());
    let mut spec = spec;
    let mut attempt: u32 = 0;

    let result = loop {
        match operator::run(ctx, spec, meta).await {
            OperatorOutcome::Done { data, meta } => break Ok(GenerationOutput { data, meta }),
            OperatorOutcome::Fatal { error, meta } => {
                tracing::warn!(error = %error, attempt, "generation failed");
                break Err(GenerationError::new(error, meta));
            }
            OperatorOutcome::Retry {
                error,
                spec: next_spec,
                meta: next_meta,
            } => {
                if attempt >= bound {
                    tracing::warn!(error = %error, attempts = attempt + 1, "retries exhausted");
                    break Err(GenerationError::new(
                        PipelineError::MaxRetries {
                            attempts: attempt + 1,
                            last_error: error,
                        },
                        next_meta,
                    ));
                }

                attempt += 1;
                tracing::info!(attempt, bound, reason = %error, "retrying generation");
                tokio::time::sleep(ctx.retry.delay).await;
                emit(
                    &ctx.event_handler,
                    Event::RetryStart {
                        attempt,
                        reason: error,
                    },
                );
                spec = next_spec;
                meta = next_meta.with_retries(attempt);
            }
        }
    };

    let (ok, run_meta) = match &result {
        Ok(output) => (true, &output.meta),
        Err(err) => (false, err.meta.as_ref()),
    };
    emit(
        &ctx.event_handler,
        Event::GenerationEnd {
            ok,
            cost: run_meta.cost,
            retries: run_meta.retries,
        },
    );

    result
}
