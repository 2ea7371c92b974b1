//! Pre module asking the model to explain itself.

use super::{BoxFut, Module, PreOutcome};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::types::{GeneratorSpec, OutputSchema};
use serde_json::{json, Map, Value};

/// Property injected into every output schema.
pub const ANALYSIS_FIELD: &str = "_analysis";

const ANALYSIS_DESCRIPTION: &str = "Your short analysis of the request and the response you generate.";

/// Adds a required `_analysis` string to every output schema.
///
/// Re-applying it (on a retry, where the spec already went through it) is a
/// no-op.
#[derive(Debug, Clone, Copy)]
pub struct Analysis;

impl Module for Analysis {
    fn pre_operate<'a>(
        &'a self,
        _ctx: &'a ExecCtx,
        spec: GeneratorSpec,
        _options: &'a Map<String, Value>,
    ) -> BoxFut<'a, Result<PreOutcome>> {
        Box::pin(async move {
            let output = spec.instructions.output.iter().map(with_analysis).collect();
            Ok(PreOutcome::Success {
                spec: spec.with_output(output),
                cost: 0.0,
            })
        })
    }
}

fn with_analysis(output: &OutputSchema) -> OutputSchema {
    let mut schema = output.schema.clone();
    if let Value::Object(ref mut root) = schema {
        let properties = root
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(properties) = properties {
            properties
                .entry(ANALYSIS_FIELD)
                .or_insert_with(|| json!({"type": "string", "description": ANALYSIS_DESCRIPTION}));
        }

        let required = root
            .entry("required")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(required) = required {
            if !required.iter().any(|r| r == ANALYSIS_FIELD) {
                required.push(json!(ANALYSIS_FIELD));
            }
        }
    }

    OutputSchema {
        description: output.description.clone(),
        schema,
    }
}
