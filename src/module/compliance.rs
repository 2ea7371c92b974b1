//! Post module validating the answer against the declared schemas.

use super::{format_error, BoxFut, Module, PostOutcome};
use crate::completion::{Completion, CompletionKind};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::function::parse_arguments;
use crate::types::GeneratorSpec;
use crate::PipelineError;
use jsonschema::Validator;
use serde_json::{Map, Value};

const NAME: &str = "Compliance";

/// JSON answers must match at least one output schema; function calls must
/// match the declared argument schema. Rejections are retryable unless the
/// `retry` option is off. A schema that does not compile is a configuration
/// error.
#[derive(Debug, Clone, Copy)]
pub struct Compliance;

impl Module for Compliance {
    fn post_operate<'a>(
        &'a self,
        _ctx: &'a ExecCtx,
        spec: &'a GeneratorSpec,
        options: &'a Map<String, Value>,
        completion: Completion,
    ) -> BoxFut<'a, Result<PostOutcome>> {
        Box::pin(async move {
            let retry = options.get("retry").and_then(Value::as_bool).unwrap_or(true);

            let verdict = match &completion.kind {
                CompletionKind::Json { data } => {
                    let validators = spec
                        .instructions
                        .output
                        .iter()
                        .map(|o| compile(&o.schema, "output schema"))
                        .collect::<Result<Vec<_>>>()?;
                    match serde_json::from_str::<Value>(data) {
                        Ok(value) => check_any(&validators, &value),
                        Err(e) => Err(format!("Invalid JSON: {}", e)),
                    }
                }
                CompletionKind::Function { call, function, .. } => {
                    let validator = compile(
                        &function.parameters,
                        &format!("parameters of function '{}'", function.name),
                    )?;
                    match parse_arguments(&call.arguments) {
                        Ok(args) => check(&validator, &args),
                        Err(e) => Err(format!("Invalid function arguments: {}", e)),
                    }
                }
                CompletionKind::Error { .. } => Ok(()),
            };

            Ok(match verdict {
                Ok(()) => PostOutcome::Success {
                    completion,
                    cost: 0.0,
                },
                Err(detail) => PostOutcome::Failure {
                    error: format_error(NAME, detail),
                    retry,
                },
            })
        })
    }
}

fn compile(schema: &Value, what: &str) -> Result<Validator> {
    jsonschema::validator_for(schema)
        .map_err(|e| PipelineError::InvalidConfig(format!("invalid {}: {}", what, e)))
}

/// Accept `value` if any schema matches. On rejection, report the first
/// schema's errors.
fn check_any(validators: &[Validator], value: &Value) -> std::result::Result<(), String> {
    let mut first_error = None;
    for validator in validators {
        match check(validator, value) {
            Ok(()) => return Ok(()),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    Err(first_error.unwrap_or_else(|| "no output schema declared".to_string()))
}

fn check(validator: &Validator, value: &Value) -> std::result::Result<(), String> {
    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
