//! Post module running the answer through the moderation service.

use super::{format_error, BoxFut, Module, PostOutcome};
use crate::completion::{Completion, CompletionKind};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::types::GeneratorSpec;
use crate::PipelineError;
use serde_json::{Map, Value};

/// Dollar cost of one moderation call.
pub const MODERATION_COST: f64 = 0.005;

const NAME: &str = "Moderation";

/// Rejects flagged answers. Needs a [`Moderator`](crate::moderation::Moderator)
/// on the [`ExecCtx`]; a missing one is a configuration fault.
#[derive(Debug, Clone, Copy)]
pub struct Moderation;

impl Module for Moderation {
    fn post_operate<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        _spec: &'a GeneratorSpec,
        options: &'a Map<String, Value>,
        completion: Completion,
    ) -> BoxFut<'a, Result<PostOutcome>> {
        Box::pin(async move {
            let moderator = ctx.moderator.as_ref().ok_or_else(|| {
                PipelineError::InvalidConfig(
                    "the moderation module needs a moderator on the execution context".into(),
                )
            })?;
            let retry = options.get("retry").and_then(Value::as_bool).unwrap_or(true);

            let text = match &completion.kind {
                CompletionKind::Json { data } => data.clone(),
                CompletionKind::Function { call, .. } => call.arguments.clone(),
                CompletionKind::Error { .. } => {
                    return Ok(PostOutcome::Success {
                        completion,
                        cost: 0.0,
                    })
                }
            };

            let verdict = match moderator.moderate(&ctx.client, &text).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    tracing::warn!(moderator = moderator.name(), error = %e, "moderation call failed");
                    return Ok(PostOutcome::Failure {
                        error: format_error(NAME, "Could not moderate"),
                        retry,
                    });
                }
            };

            if !verdict.is_success() {
                return Ok(PostOutcome::Failure {
                    error: format_error(NAME, "Could not moderate"),
                    retry,
                });
            }
            if verdict.flagged {
                let category = verdict.category.as_deref().unwrap_or("unknown");
                return Ok(PostOutcome::Failure {
                    error: format_error(NAME, format!("Message flagged: {}", category)),
                    retry,
                });
            }

            Ok(PostOutcome::Success {
                completion,
                cost: MODERATION_COST,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::moderation::{ModerationVerdict, Moderator};
    use crate::types::{Instructions, OutputSchema, Settings};
    use async_trait::async_trait;
    use reqwest::Client;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedModerator {
        verdict: Option<ModerationVerdict>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Moderator for FixedModerator {
        async fn moderate(&self, _client: &Client, _text: &str) -> Result<ModerationVerdict> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.verdict
                .clone()
                .ok_or_else(|| PipelineError::Other("service down".into()))
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn spec() -> GeneratorSpec {
        GeneratorSpec {
            instructions: Instructions {
                prompt: "p".into(),
                context: None,
                information: None,
                examples: Vec::new(),
                options: Vec::new(),
                output: vec![OutputSchema::new(json!({"type": "object"}))],
                functions: Vec::new(),
            },
            settings: Settings::default(),
            flow: None,
            data: Value::Null,
            options: HashMap::new(),
            history: Vec::new(),
        }
    }

    async fn run(verdict: Option<ModerationVerdict>) -> PostOutcome {
        let moderator = Arc::new(FixedModerator {
            verdict,
            calls: AtomicUsize::new(0),
        });
        let ctx = ExecCtx::builder("http://unused")
            .backend(Arc::new(MockBackend::fixed("{}")))
            .moderator(moderator.clone())
            .build();
        let mut options = Map::new();
        options.insert("retry".into(), json!(true));
        let outcome = Moderation
            .post_operate(&ctx, &spec(), &options, Completion::json(r#"{"a": 1}"#, 0.0))
            .await
            .unwrap();
        assert_eq!(moderator.calls.load(Ordering::Relaxed), 1);
        outcome
    }

    #[tokio::test]
    async fn test_clean_text_costs_moderation_fee() {
        match run(Some(ModerationVerdict::clean())).await {
            PostOutcome::Success { cost, .. } => assert_eq!(cost, MODERATION_COST),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_flagged_text_is_retryable() {
        match run(Some(ModerationVerdict::flagged("TOXICITY"))).await {
            PostOutcome::Failure { error, retry } => {
                assert_eq!(error, "Moderation - Message flagged: TOXICITY");
                assert!(retry);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_service_failure_is_retryable() {
        match run(None).await {
            PostOutcome::Failure { error, retry } => {
                assert_eq!(error, "Moderation - Could not moderate");
                assert!(retry);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_moderator_is_config_error() {
        let ctx = ExecCtx::builder("http://unused")
            .backend(Arc::new(MockBackend::fixed("{}")))
            .build();
        let err = Moderation
            .post_operate(&ctx, &spec(), &Map::new(), Completion::json("{}", 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
