//! One pass of the pipeline: pre modules → completion → post modules.
//!
//! ```text
//! PreProcessing ──► Generating ──► PostProcessing ──► Done
//!       │               │                │
//!       └──► Fatal ◄────┘                ├──► Retry  (rejection with retry)
//!                                        └──► Fatal  (rejection without retry)
//! ```
//!
//! Module phase comes from the registry, not from where the step sits in the
//! flow relative to `generate`. Within a phase, flow order is kept.

use crate::completion::{complete, Completion, CompletionKind};
use crate::exec_ctx::ExecCtx;
use crate::function::parse_arguments;
use crate::meta::RunMeta;
use crate::module::{self, ModuleEntry, Phase, PostOutcome, PreOutcome};
use crate::types::GeneratorSpec;
use crate::PipelineError;
use serde_json::{json, Map, Value};
use tracing::instrument;

/// How one pass ended.
#[derive(Debug)]
pub enum OperatorOutcome {
    /// Final payload.
    Done { data: Value, meta: RunMeta },
    /// A post module asked for a new attempt. `spec` is the spec as rewritten
    /// by the pre modules.
    Retry {
        error: String,
        spec: GeneratorSpec,
        meta: RunMeta,
    },
    /// Unrecoverable failure.
    Fatal { error: PipelineError, meta: RunMeta },
}

type Step = (&'static ModuleEntry, Map<String, Value>);

/// Run the flow of `spec` once.
#[instrument(skip_all, fields(model = %spec.settings.model, retries = meta.retries))]
pub async fn run(ctx: &ExecCtx, spec: GeneratorSpec, meta: RunMeta) -> OperatorOutcome {
    let (pre, post) = match plan(&spec) {
        Ok(steps) => steps,
        Err(error) => return OperatorOutcome::Fatal { error, meta },
    };

    // pre
    let mut spec = spec;
    let mut meta = meta;
    for (entry, options) in &pre {
        match module::run_pre(ctx, entry, options, spec.clone(), meta.clone()).await {
            Ok((PreOutcome::Success { spec: next, .. }, next_meta)) => {
                spec = next;
                meta = next_meta;
            }
            Ok((PreOutcome::Failure { error }, meta)) => {
                return OperatorOutcome::Fatal {
                    error: PipelineError::Module(error),
                    meta,
                };
            }
            Err(error) => return OperatorOutcome::Fatal { error, meta },
        }
    }

    // generate
    let completion = match complete(ctx, &spec).await {
        Ok(completion) => completion.with_retries(meta.retries),
        Err(failure) => {
            return OperatorOutcome::Fatal {
                error: failure.error,
                meta: meta.with_cost_added(failure.cost),
            }
        }
    };
    let mut meta = meta.with_cost_added(completion.cost);
    if let CompletionKind::Error { ref error } = completion.kind {
        return OperatorOutcome::Fatal {
            error: PipelineError::Transport(error.clone()),
            meta,
        };
    }

    // post
    let mut completion = completion;
    for (entry, options) in &post {
        match module::run_post(ctx, entry, options, &spec, completion.clone(), meta.clone()).await {
            Ok((PostOutcome::Success { completion: next, .. }, next_meta)) => {
                completion = next;
                meta = next_meta;
            }
            Ok((PostOutcome::Failure { error, retry: true }, meta)) => {
                return OperatorOutcome::Retry { error, spec, meta };
            }
            Ok((PostOutcome::Failure { error, retry: false }, meta)) => {
                return OperatorOutcome::Fatal {
                    error: PipelineError::Module(error),
                    meta,
                };
            }
            Err(error) => return OperatorOutcome::Fatal { error, meta },
        }
    }

    match finish(completion) {
        Ok(data) => OperatorOutcome::Done { data, meta },
        Err(error) => OperatorOutcome::Fatal { error, meta },
    }
}

/// Resolve the flow's modules and split them by phase.
fn plan(spec: &GeneratorSpec) -> Result<(Vec<Step>, Vec<Step>), PipelineError> {
    let mut pre = Vec::new();
    let mut post = Vec::new();
    for step in spec.process_steps() {
        let entry = module::lookup(&step.name).ok_or_else(|| {
            PipelineError::InvalidConfig(format!("unknown module '{}'", step.name))
        })?;
        match entry.phase {
            Phase::Pre => pre.push((entry, step.options.clone())),
            Phase::Post => post.push((entry, step.options.clone())),
        }
    }
    Ok((pre, post))
}

/// Turn the final completion into the caller-facing payload.
fn finish(completion: Completion) -> Result<Value, PipelineError> {
    match completion.kind {
        CompletionKind::Json { data } => serde_json::from_str(&data)
            .map_err(|e| PipelineError::InvalidJson(e.to_string())),
        CompletionKind::Function { call, chain, .. } => {
            let arguments = parse_arguments(&call.arguments)
                .map_err(|e| PipelineError::InvalidJson(e.to_string()))?;
            Ok(json!({
                "type": "function",
                "name": call.name,
                "arguments": arguments,
                "chain": chain,
            }))
        }
        CompletionKind::Error { error } => Err(PipelineError::Transport(error)),
    }
}
