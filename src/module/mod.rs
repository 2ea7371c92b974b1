//! Pluggable pre/post steps around the model call.
//!
//! Every step implements [`Module`]. Pre-phase modules may rewrite the
//! [`GeneratorSpec`] before the call; post-phase modules inspect (and may
//! replace) the [`Completion`] after it. Modules report failures as
//! outcomes, not errors: only configuration faults escape as `Err`.
//!
//! [`run_pre`] and [`run_post`] are the shared wrappers the operator goes
//! through. They resolve options against the registry, emit lifecycle
//! events, and record a [`ProcessInfo`] for every invocation.

pub mod analysis;
pub mod carbon;
pub mod compliance;
pub mod moderation;
pub mod registry;

pub use analysis::Analysis;
pub use carbon::Carbon;
pub use compliance::Compliance;
pub use moderation::Moderation;
pub use registry::{lookup, resolve_options, ModuleEntry, OptionDefault, OptionDefinition, REGISTRY};

use crate::completion::Completion;
use crate::error::Result;
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::meta::{ProcessInfo, ProcessStatus, RunMeta};
use crate::types::GeneratorSpec;
use crate::PipelineError;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;

/// A boxed, pinned, Send future -- the return type of [`Module`] methods.
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// When a module runs relative to the model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pre => "pre",
            Phase::Post => "post",
        }
    }
}

/// Outcome of a pre-phase module.
#[derive(Debug, Clone)]
pub enum PreOutcome {
    /// Continue with the (possibly rewritten) spec.
    Success { spec: GeneratorSpec, cost: f64 },
    /// Stop the run. Pre failures are never retried.
    Failure { error: String },
}

/// Outcome of a post-phase module.
#[derive(Debug, Clone)]
pub enum PostOutcome {
    /// Continue with the (possibly replaced) completion.
    Success { completion: Completion, cost: f64 },
    /// Reject the completion; `retry` asks for a whole new attempt.
    Failure { error: String, retry: bool },
}

/// Object-safe trait for pipeline steps.
///
/// A module implements the phase it is registered under. The default
/// methods reject the call with [`PipelineError::InvalidConfig`].
pub trait Module: Send + Sync {
    fn pre_operate<'a>(
        &'a self,
        _ctx: &'a ExecCtx,
        _spec: GeneratorSpec,
        _options: &'a Map<String, Value>,
    ) -> BoxFut<'a, Result<PreOutcome>> {
        Box::pin(async {
            Err(PipelineError::InvalidConfig(
                "module does not implement the pre phase".into(),
            ))
        })
    }

    fn post_operate<'a>(
        &'a self,
        _ctx: &'a ExecCtx,
        _spec: &'a GeneratorSpec,
        _options: &'a Map<String, Value>,
        _completion: Completion,
    ) -> BoxFut<'a, Result<PostOutcome>> {
        Box::pin(async {
            Err(PipelineError::InvalidConfig(
                "module does not implement the post phase".into(),
            ))
        })
    }
}

/// Format a module failure as `"<ModuleName> - <detail>"`.
pub fn format_error(module: &str, detail: impl std::fmt::Display) -> String {
    format!("{} - {}", module, detail)
}

/// Run a pre-phase module and record its outcome in `meta`.
///
/// Returns the outcome together with the updated meta. Configuration
/// faults (wrong phase) come back as `Err` and leave no audit entry.
pub async fn run_pre(
    ctx: &ExecCtx,
    entry: &ModuleEntry,
    supplied: &Map<String, Value>,
    spec: GeneratorSpec,
    meta: RunMeta,
) -> Result<(PreOutcome, RunMeta)> {
    ensure_phase(entry, Phase::Pre)?;
    let options = resolve_options(entry.options, supplied);

    emit(
        &ctx.event_handler,
        Event::ModuleStart {
            module: entry.key.to_string(),
            phase: Phase::Pre,
        },
    );
    let outcome = entry.module.pre_operate(ctx, spec, &options).await?;

    let (ok, cost, error) = match &outcome {
        PreOutcome::Success { cost, .. } => (true, *cost, None),
        PreOutcome::Failure { error } => (false, 0.0, Some(error.clone())),
    };
    let meta = record(entry, options, meta, cost, error);
    emit(
        &ctx.event_handler,
        Event::ModuleEnd {
            module: entry.key.to_string(),
            ok,
        },
    );

    Ok((outcome, meta))
}

/// Run a post-phase module and record its outcome in `meta`.
pub async fn run_post(
    ctx: &ExecCtx,
    entry: &ModuleEntry,
    supplied: &Map<String, Value>,
    spec: &GeneratorSpec,
    completion: Completion,
    meta: RunMeta,
) -> Result<(PostOutcome, RunMeta)> {
    ensure_phase(entry, Phase::Post)?;
    let options = resolve_options(entry.options, supplied);

    emit(
        &ctx.event_handler,
        Event::ModuleStart {
            module: entry.key.to_string(),
            phase: Phase::Post,
        },
    );
    let outcome = entry
        .module
        .post_operate(ctx, spec, &options, completion)
        .await?;

    let (ok, cost, error) = match &outcome {
        PostOutcome::Success { cost, .. } => (true, *cost, None),
        PostOutcome::Failure { error, .. } => (false, 0.0, Some(error.clone())),
    };
    let meta = record(entry, options, meta, cost, error);
    emit(
        &ctx.event_handler,
        Event::ModuleEnd {
            module: entry.key.to_string(),
            ok,
        },
    );

    Ok((outcome, meta))
}

fn ensure_phase(entry: &ModuleEntry, phase: Phase) -> Result<()> {
    if entry.phase == phase {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(format!(
            "module '{}' runs in the {} phase, not {}",
            entry.key,
            entry.phase.as_str(),
            phase.as_str()
        )))
    }
}

fn record(
    entry: &ModuleEntry,
    options: Map<String, Value>,
    meta: RunMeta,
    cost: f64,
    error: Option<String>,
) -> RunMeta {
    let status = if error.is_some() {
        ProcessStatus::Failed
    } else {
        ProcessStatus::Success
    };
    match &error {
        Some(e) => tracing::warn!(module = entry.key, error = %e, "module rejected run"),
        None => tracing::debug!(module = entry.key, cost, "module succeeded"),
    }

    let info = ProcessInfo {
        module: entry.name.to_string(),
        options,
        status,
        cost,
        retries: meta.retries,
        error,
    };
    meta.with_cost_added(cost).with_process(entry.key, info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::events::FnEventHandler;
    use crate::types::{Instructions, OutputSchema, Settings};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn ctx() -> ExecCtx {
        ExecCtx::builder("http://unused")
            .backend(Arc::new(MockBackend::fixed("{}")))
            .build()
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

    #[test]
    fn test_format_error() {
        assert_eq!(format_error("Compliance", "bad shape"), "Compliance - bad shape");
    }

    #[tokio::test]
    async fn test_run_post_records_cost_and_options() {
        let entry = lookup("carbon").unwrap();
        let completion = Completion::json("{}", 0.0);
        let (outcome, meta) = run_post(
            &ctx(),
            entry,
            &Map::new(),
            &spec(),
            completion,
            RunMeta::new("gpt-4"),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, PostOutcome::Success { .. }));
        assert!((meta.cost - carbon::CARBON_COST).abs() < 1e-9);
        let info = &meta.process["carbon"];
        assert_eq!(info.module, "Carbon");
        assert_eq!(info.status, ProcessStatus::Success);
        assert!(info.error.is_none());
    }

    #[tokio::test]
    async fn test_run_post_records_failure() {
        let entry = lookup("compliance").unwrap();
        let mut supplied = Map::new();
        supplied.insert("retry".into(), json!(false));
        let completion = Completion::json("not json", 0.0);
        let (outcome, meta) = run_post(
            &ctx(),
            entry,
            &supplied,
            &spec(),
            completion,
            RunMeta::new("gpt-4").with_retries(2),
        )
        .await
        .unwrap();

        match outcome {
            PostOutcome::Failure { error, retry } => {
                assert!(error.starts_with("Compliance - "));
                assert!(!retry);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        let info = &meta.process["compliance"];
        assert_eq!(info.status, ProcessStatus::Failed);
        assert_eq!(info.retries, 2);
        assert_eq!(info.options["retry"], json!(false));
        assert_eq!(meta.cost, 0.0);
    }

    #[tokio::test]
    async fn test_wrong_phase_is_config_error() {
        let entry = lookup("analysis").unwrap();
        let err = run_post(
            &ctx(),
            entry,
            &Map::new(),
            &spec(),
            Completion::json("{}", 0.0),
            RunMeta::new("gpt-4"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));

        let entry = lookup("carbon").unwrap();
        let err = run_pre(&ctx(), entry, &Map::new(), spec(), RunMeta::new("gpt-4"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_events_emitted_around_module() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = ExecCtx::builder("http://unused")
            .backend(Arc::new(MockBackend::fixed("{}")))
            .event_handler(Arc::new(FnEventHandler(move |event: Event| {
                sink.lock().unwrap().push(format!("{:?}", event));
            })))
            .build();

        let entry = lookup("analysis").unwrap();
        let (outcome, _) = run_pre(&ctx, entry, &Map::new(), spec(), RunMeta::new("gpt-4"))
            .await
            .unwrap();
        assert!(matches!(outcome, PreOutcome::Success { .. }));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].starts_with("ModuleStart"));
        assert!(seen[1].contains("ok: true"));
    }
}
