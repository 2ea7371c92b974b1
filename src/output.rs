//! Result of a successful generation.

use crate::error::Result;
use crate::meta::RunMeta;
use crate::PipelineError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Final payload plus the metadata of the run that produced it.
///
/// `data` is the decoded JSON answer, or for a function call
/// `{"type": "function", "name", "arguments", "chain"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub data: Value,
    pub meta: RunMeta,
}

impl GenerationOutput {
    /// Parse the payload into a typed `T`.
    ///
    /// ```ignore
    /// let output = generate(&ctx, spec).await?;
    /// let reply: CustomerReply = output.parse_as()?;
    /// ```
    pub fn parse_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            let snippet = self.data.to_string();
            let snippet: String = snippet.chars().take(200).collect();
            PipelineError::Other(format!(
                "Failed to parse generation output into target type: {}. Value (truncated): {}",
                e, snippet
            ))
        })
    }

    /// Whether the model answered with a function call.
    pub fn is_function_call(&self) -> bool {
        self.data.get("type").and_then(Value::as_str) == Some("function")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        foo: String,
    }

    #[test]
    fn test_parse_as() {
        let output = GenerationOutput {
            data: json!({"foo": "x"}),
            meta: RunMeta::new("gpt-4"),
        };
        assert_eq!(output.parse_as::<Reply>().unwrap(), Reply { foo: "x".into() });
        assert!(!output.is_function_call());
    }

    #[test]
    fn test_parse_as_mismatch() {
        let output = GenerationOutput {
            data: json!({"bar": 1}),
            meta: RunMeta::new("gpt-4"),
        };
        let err = output.parse_as::<Reply>().unwrap_err();
        assert!(err.to_string().contains("Failed to parse generation output"));
    }

    #[test]
    fn test_function_call_payload() {
        let output = GenerationOutput {
            data: json!({"type": "function", "name": "notify", "arguments": {}, "chain": false}),
            meta: RunMeta::new("gpt-4"),
        };
        assert!(output.is_function_call());
    }
}
