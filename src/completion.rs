//! Completion driver: one model answer, chaining through functions.
//!
//! [`complete`] compiles the spec, calls the backend and looks at the reply:
//!
//! - content → [`CompletionKind::Json`]
//! - a call to a non-chaining function → [`CompletionKind::Function`],
//!   returned without executing it
//! - a call to a chaining endpoint function → the endpoint is called, the
//!   call and its result are appended to the history, and the model is
//!   asked again
//! - a call to a chaining external function → returned for the caller to run
//!
//! Chaining is a loop bounded by [`ExecCtx::max_chain_hops`]. Cost is summed
//! across every call of the loop.

use crate::backend::{ChatMessage, ChatRequest, ChatResponse, FunctionCall, Reply};
use crate::error::Result;
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::function::{call_endpoint, parse_arguments, FunctionDeclaration};
use crate::pricing::usage_cost;
use crate::prompt::compile;
use crate::types::{FunctionTarget, GeneratorSpec};
use crate::PipelineError;
use tracing::instrument;

/// What one generation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub kind: CompletionKind,
    /// Dollar cost of the model calls behind this completion.
    pub cost: f64,
    /// Retry counter of the attempt that produced it.
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionKind {
    /// Raw answer text, expected to be JSON.
    Json { data: String },
    /// The model selected a function the pipeline does not run itself.
    Function {
        call: FunctionCall,
        function: FunctionDeclaration,
        chain: bool,
    },
    /// The backend failed.
    Error { error: String },
}

impl Completion {
    pub fn json(data: impl Into<String>, cost: f64) -> Self {
        Self::new(CompletionKind::Json { data: data.into() }, cost)
    }

    pub fn function(call: FunctionCall, function: FunctionDeclaration, cost: f64) -> Self {
        let chain = function.chain;
        Self::new(
            CompletionKind::Function {
                call,
                function,
                chain,
            },
            cost,
        )
    }

    pub fn error(error: impl Into<String>, cost: f64) -> Self {
        Self::new(CompletionKind::Error { error: error.into() }, cost)
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, CompletionKind::Error { .. })
    }

    fn new(kind: CompletionKind, cost: f64) -> Self {
        Self {
            kind,
            cost,
            retries: 0,
        }
    }
}

/// A completion that was abandoned after `cost` had already been billed.
#[derive(Debug)]
pub struct CompletionFailure {
    pub error: PipelineError,
    pub cost: f64,
}

impl CompletionFailure {
    fn new(error: PipelineError, cost: f64) -> Self {
        Self { error, cost }
    }
}

/// Run the model on `spec`, following chained functions.
///
/// Backend failures come back as an [`CompletionKind::Error`] completion.
/// A missing credential, a timeout, a failing endpoint function and an
/// exceeded hop limit are returned as [`CompletionFailure`], carrying the
/// cost of the hops made before the failure.
#[instrument(skip_all, fields(model = %spec.settings.model, stream = spec.settings.stream))]
pub async fn complete(
    ctx: &ExecCtx,
    spec: &GeneratorSpec,
) -> std::result::Result<Completion, CompletionFailure> {
    let mut current = spec.clone();
    let mut cost = 0.0;
    let mut hop = 0usize;

    loop {
        let compiled = compile(&current);
        let request = ChatRequest {
            model: current.settings.model.clone(),
            messages: compiled.messages,
            functions: compiled.functions,
            api_key: current.settings.api_key.clone(),
            stream: current.settings.stream,
        };

        let response = match call(ctx, &request).await {
            Ok(response) => response,
            Err(e @ (PipelineError::InvalidConfig(_) | PipelineError::Timeout(_))) => {
                return Err(CompletionFailure::new(e, cost))
            }
            Err(e) => {
                tracing::warn!(backend = ctx.backend.name(), error = %e, "completion failed");
                return Ok(Completion::error(e.to_string(), cost));
            }
        };
        cost += usage_cost(&request.model, &response.usage);
        tracing::debug!(
            hop,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            cost,
            "model replied"
        );

        let call = match response.reply {
            Reply::Content(text) => return Ok(Completion::json(text, cost)),
            Reply::FunctionCall(call) => call,
        };

        let Some(declaration) = request.functions.iter().find(|f| f.name == call.name).cloned()
        else {
            tracing::warn!(function = %call.name, "model called an undeclared function");
            return Ok(Completion::error(
                format!("Function '{}' is not declared", call.name),
                cost,
            ));
        };

        emit(
            &ctx.event_handler,
            Event::FunctionCall {
                name: call.name.clone(),
                hop,
                chain: declaration.chain,
            },
        );

        if !declaration.chain {
            return Ok(Completion::function(call, declaration, cost));
        }
        let Some(func) = current.function(&call.name) else {
            return Ok(Completion::function(call, declaration, cost));
        };
        if matches!(func.target, FunctionTarget::External) {
            return Ok(Completion::function(call, declaration, cost));
        }

        hop += 1;
        if hop > ctx.max_chain_hops {
            return Err(CompletionFailure::new(
                PipelineError::ChainLimit(ctx.max_chain_hops),
                cost,
            ));
        }

        let arguments = parse_arguments(&call.arguments).map_err(|e| {
            let error = PipelineError::ExternalCall {
                function: call.name.clone(),
                message: format!("malformed arguments: {}", e),
            };
            CompletionFailure::new(error, cost)
        })?;
        let result = call_endpoint(&ctx.client, func, &arguments)
            .await
            .map_err(|e| CompletionFailure::new(e, cost))?;

        let result_turn = ChatMessage::function_result(call.name.clone(), result.to_string());
        current = current.with_history([ChatMessage::function_call(call), result_turn]);
    }
}

/// One backend call, streamed when requested and bounded by the call timeout.
async fn call(ctx: &ExecCtx, request: &ChatRequest) -> Result<ChatResponse> {
    let fut = async {
        if request.stream {
            let handler = ctx.event_handler.clone();
            let mut on_token = move |chunk: String| emit(&handler, Event::Token { chunk });
            ctx.backend
                .chat_streaming(&ctx.client, &ctx.base_url, request, &mut on_token)
                .await
        } else {
            ctx.backend.chat(&ctx.client, &ctx.base_url, request).await
        }
    };

    match ctx.call_timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| PipelineError::Timeout(limit))?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockReply, OpenAiBackend, Role};
    use crate::events::FnEventHandler;
    use crate::types::{
        FunctionArgument, FunctionSpec, HttpMethod, Instructions, OutputSchema, PayloadPlacement,
        Settings, ValueType,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn function(name: &str, chain: bool, target: FunctionTarget) -> FunctionSpec {
        FunctionSpec {
            name: name.into(),
            description: format!("{} function", name),
            arguments: vec![FunctionArgument {
                name: "id".into(),
                description: None,
                kind: ValueType::Number,
                required: true,
                default: None,
            }],
            chain,
            target,
        }
    }

    fn endpoint(url: &str) -> FunctionTarget {
        FunctionTarget::Endpoint {
            url: url.into(),
            method: HttpMethod::Get,
            payload: PayloadPlacement::Query,
            headers: HashMap::new(),
        }
    }

    fn spec(functions: Vec<FunctionSpec>) -> GeneratorSpec {
        GeneratorSpec {
            instructions: Instructions {
                prompt: "Answer".into(),
                context: None,
                information: None,
                examples: Vec::new(),
                options: Vec::new(),
                output: vec![OutputSchema::new(json!({"type": "object"}))],
                functions,
            },
            settings: Settings::default(),
            flow: None,
            data: json!({"q": 1}),
            options: HashMap::new(),
            history: Vec::new(),
        }
    }

    fn ctx(mock: Arc<MockBackend>) -> ExecCtx {
        ExecCtx::builder("http://unused").backend(mock).build()
    }

    #[tokio::test]
    async fn test_content_reply_is_json_completion_with_cost() {
        let mock = Arc::new(MockBackend::new(vec![
            MockReply::content(r#"{"a": 1}"#).with_usage(1000, 1000)
        ]));
        let completion = complete(&ctx(mock.clone()), &spec(Vec::new())).await.unwrap();
        assert_eq!(completion.kind, CompletionKind::Json { data: r#"{"a": 1}"#.into() });
        assert!((completion.cost - 0.0035).abs() < 1e-9);
        assert_eq!(mock.calls(), 1);
        assert!(mock.requests()[0].functions.is_empty());
    }

    #[tokio::test]
    async fn test_non_chain_function_returned_unexecuted() {
        let mock = Arc::new(MockBackend::new(vec![MockReply::function_call("fetch", r#"{"id": 1}"#)]));
        // unreachable URL: executing it would fail the test
        let spec = spec(vec![function("fetch", false, endpoint("http://127.0.0.1:9/fetch"))]);
        let completion = complete(&ctx(mock.clone()), &spec).await.unwrap();
        match completion.kind {
            CompletionKind::Function { call, function, chain } => {
                assert_eq!(call.name, "fetch");
                assert_eq!(function.name, "fetch");
                assert!(!chain);
            }
            other => panic!("expected function completion, got {:?}", other),
        }
        assert_eq!(mock.calls(), 1);
        assert_eq!(mock.requests()[0].functions.len(), 1);
    }

    #[tokio::test]
    async fn test_chain_external_function_returned() {
        let mock = Arc::new(MockBackend::new(vec![MockReply::function_call("ask_user", "{}")]));
        let spec = spec(vec![function("ask_user", true, FunctionTarget::External)]);
        let completion = complete(&ctx(mock), &spec).await.unwrap();
        assert!(matches!(completion.kind, CompletionKind::Function { chain: true, .. }));
    }

    #[tokio::test]
    async fn test_undeclared_function_is_error_completion() {
        let mock = Arc::new(MockBackend::new(vec![
            MockReply::function_call("rm_rf", "{}").with_usage(1000, 0)
        ]));
        let completion = complete(&ctx(mock), &spec(Vec::new())).await.unwrap();
        assert!(completion.is_error());
        assert!((completion.cost - 0.0015).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_transport_failure_is_error_completion() {
        let mock = Arc::new(MockBackend::new(vec![MockReply::error("upstream down")]));
        let completion = complete(&ctx(mock), &spec(Vec::new())).await.unwrap();
        match completion.kind {
            CompletionKind::Error { error } => assert!(error.contains("upstream down")),
            other => panic!("expected error completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_credential_is_config_error() {
        let ctx = ExecCtx::builder("http://127.0.0.1:9")
            .backend(Arc::new(OpenAiBackend::new()))
            .build();
        let failure = complete(&ctx, &spec(Vec::new())).await.unwrap_err();
        assert!(matches!(failure.error, PipelineError::InvalidConfig(_)));
        assert_eq!(failure.cost, 0.0);
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let mock = Arc::new(MockBackend::fixed("{}").with_delay(Duration::from_millis(500)));
        let ctx = ExecCtx::builder("http://unused")
            .backend(mock)
            .call_timeout(Duration::from_millis(20))
            .build();
        let failure = complete(&ctx, &spec(Vec::new())).await.unwrap_err();
        assert!(matches!(failure.error, PipelineError::Timeout(d) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_chain_limit() {
        let mock = Arc::new(MockBackend::new(vec![
            MockReply::function_call("fetch", r#"{"id": 1}"#).with_usage(1000, 1000)
        ]));
        let ctx = ExecCtx::builder("http://unused")
            .backend(mock.clone())
            .max_chain_hops(0)
            .build();
        let spec = spec(vec![function("fetch", true, endpoint("http://127.0.0.1:9/fetch"))]);
        let failure = complete(&ctx, &spec).await.unwrap_err();
        assert!(matches!(failure.error, PipelineError::ChainLimit(0)));
        assert!((failure.cost - 0.0035).abs() < 1e-9);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_chain_arguments_are_fatal() {
        let mock = Arc::new(MockBackend::new(vec![
            MockReply::function_call("fetch", "{id:").with_usage(1000, 0)
        ]));
        let spec = spec(vec![function("fetch", true, endpoint("http://127.0.0.1:9/fetch"))]);
        let failure = complete(&ctx(mock), &spec).await.unwrap_err();
        assert!(matches!(
            failure.error,
            PipelineError::ExternalCall { ref function, .. } if function == "fetch"
        ));
        assert!((failure.cost - 0.0015).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_streaming_forwards_tokens() {
        let tokens = Arc::new(Mutex::new(Vec::new()));
        let sink = tokens.clone();
        let ctx = ExecCtx::builder("http://unused")
            .backend(Arc::new(MockBackend::fixed(r#"{"a": 1}"#)))
            .event_handler(Arc::new(FnEventHandler(move |event: Event| {
                if let Event::Token { chunk } = event {
                    sink.lock().unwrap().push(chunk);
                }
            })))
            .build();
        let mut spec = spec(Vec::new());
        spec.settings.stream = true;

        let completion = complete(&ctx, &spec).await.unwrap();
        assert!(matches!(completion.kind, CompletionKind::Json { .. }));
        assert_eq!(*tokens.lock().unwrap(), vec![r#"{"a": 1}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_request_carries_settings() {
        let mock = Arc::new(MockBackend::fixed("{}"));
        let mut spec = spec(Vec::new());
        spec.settings.model = "gpt-4".into();
        spec.settings.api_key = Some("sk-request".into());
        complete(&ctx(mock.clone()), &spec).await.unwrap();

        let request = &mock.requests()[0];
        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.api_key.as_deref(), Some("sk-request"));
        let last = request.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content.as_deref(), Some(r#"{"q":1}"#));
    }
}
