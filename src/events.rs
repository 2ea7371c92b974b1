//! Event system for pipeline lifecycle and streaming hooks.
//!
//! Provides an optional, non-intrusive way to observe a generation run.
//! The pipeline emits events when modules run, when the model calls a
//! function, when an attempt is retried, and for every streamed token.
//! Implement [`EventHandler`] to forward them to a stream sink, a progress
//! UI, or metrics.

use crate::module::Phase;
use std::sync::Arc;

/// Events emitted during a generation run.
#[derive(Debug, Clone)]
pub enum Event {
    /// A module is about to run.
    ModuleStart {
        /// Registry key of the module (e.g. `"compliance"`).
        module: String,
        phase: Phase,
    },
    /// A module has finished.
    ModuleEnd {
        module: String,
        /// Whether the module accepted the run.
        ok: bool,
    },
    /// A token was received during streaming.
    Token {
        /// The token text.
        chunk: String,
    },
    /// The model selected a declared function.
    FunctionCall {
        /// Function name.
        name: String,
        /// Chain hop the call happened on (0-indexed).
        hop: usize,
        /// Whether the model will be re-invoked with the result.
        chain: bool,
    },
    /// A whole pre → generate → post attempt is being retried.
    RetryStart {
        /// The retry attempt number (1-indexed).
        attempt: u32,
        /// The module failure that triggered the retry.
        reason: String,
    },
    /// The run is over.
    GenerationEnd {
        ok: bool,
        /// Total cost in dollars.
        cost: f64,
        /// Number of retries performed.
        retries: u32,
    },
}

/// Handler for pipeline lifecycle events.
///
/// This is entirely optional -- generation works without an event handler.
///
/// # Example
///
/// ```
/// use generator_pipeline::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::Token { chunk } => print!("{}", chunk),
///             Event::ModuleEnd { module, ok } => println!("[{}] ok={}", module, ok),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when the pipeline emits an event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use generator_pipeline::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::Token { chunk } = event {
///         print!("{}", chunk);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
