//! Post module charging the carbon offset.

use super::{BoxFut, Module, PostOutcome};
use crate::completion::Completion;
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::types::GeneratorSpec;
use serde_json::{Map, Value};

/// Dollar surcharge per generation.
pub const CARBON_COST: f64 = 0.001;

#[derive(Debug, Clone, Copy)]
pub struct Carbon;

impl Module for Carbon {
    fn post_operate<'a>(
        &'a self,
        _ctx: &'a ExecCtx,
        _spec: &'a GeneratorSpec,
        _options: &'a Map<String, Value>,
        completion: Completion,
    ) -> BoxFut<'a, Result<PostOutcome>> {
        Box::pin(async move {
            Ok(PostOutcome::Success {
                completion,
                cost: CARBON_COST,
            })
        })
    }
}
