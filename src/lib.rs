//! # Generator Pipeline
//!
//! Turns a declarative generator spec (prompt, output schemas, callable
//! functions, user data) into a schema-conformant JSON answer or function
//! call from a chat-completion LLM.
//!
//! ## Core Concepts
//!
//! - **[`GeneratorSpec`]**: the declarative input, `serde`-ready.
//! - **[`ExecCtx`]**: shared execution context (HTTP client, backend,
//!   moderator, retry policy, timeouts, optional event handler).
//! - **[`generate`]**: runs pre modules, the model call and post modules,
//!   retrying the whole pass when a post module asks for it.
//! - **[`Module`]**: pluggable pre/post step. Built-ins: `analysis`,
//!   `compliance`, `moderation`, `carbon`.
//! - **[`Backend`]**: the LLM transport. [`OpenAiBackend`] talks to any
//!   OpenAI-compatible endpoint; [`MockBackend`] serves canned replies.
//!
//! ## Quick Start
//!
//! ```no_run
//! use generator_pipeline::{generate, ExecCtx, GeneratorSpec};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Reply { summary: String }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = ExecCtx::builder("https://api.openai.com/v1")
//!         .openai_with_key(std::env::var("OPENAI_API_KEY")?)
//!         .build();
//!
//!     let spec = GeneratorSpec::from_json_str(r#"{
//!         "instructions": {
//!             "prompt": "Summarize the ticket",
//!             "output": {"schema": {
//!                 "type": "object",
//!                 "properties": {"summary": {"type": "string"}},
//!                 "required": ["summary"]
//!             }}
//!         },
//!         "settings": {"model": "gpt-4.1-mini"},
//!         "flow": [
//!             {"type": "generate"},
//!             {"type": "process", "module": {"name": "compliance"}}
//!         ],
//!         "data": "My printer is on fire"
//!     }"#)?;
//!
//!     let output = generate(&ctx, spec).await?;
//!     let reply: Reply = output.parse_as()?;
//!     println!("{} (${:.4})", reply.summary, output.meta.cost);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod completion;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod function;
pub mod meta;
pub mod moderation;
pub mod module;
pub mod operator;
pub mod output;
pub mod pricing;
pub mod prompt;
pub mod retry;
pub mod types;

pub use backend::{Backend, MockBackend, MockReply, OpenAiBackend};
pub use completion::{Completion, CompletionFailure, CompletionKind};
pub use error::{GenerationError, PipelineError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use meta::{ProcessInfo, ProcessStatus, RunMeta};
pub use moderation::{HttpModerator, ModerationVerdict, Moderator};
pub use module::{Module, Phase};
pub use output::GenerationOutput;
pub use prompt::{compile, CompiledPrompt};
pub use retry::{generate, RetryConfig};
pub use types::GeneratorSpec;
