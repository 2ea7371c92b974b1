//! Callable functions: transport declarations and endpoint execution.
//!
//! A [`FunctionSpec`] from the generator compiles into a
//! [`FunctionDeclaration`] the transport understands. When the model picks an
//! endpoint function that chains, [`call_endpoint`] performs the declared HTTP
//! call and returns its JSON result.

use crate::error::Result;
use crate::types::{FunctionSpec, FunctionTarget, PayloadPlacement};
use crate::PipelineError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// A function declaration in the transport's shape.
///
/// `chain` is carried along so the driver can read it back after the model
/// selects the function. It is not sent to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
    #[serde(skip_serializing, default)]
    pub chain: bool,
}

impl From<&FunctionSpec> for FunctionDeclaration {
    fn from(func: &FunctionSpec) -> Self {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for arg in &func.arguments {
            let mut property = Map::new();
            property.insert("type".into(), json!(arg.kind.as_str()));
            if let Some(ref description) = arg.description {
                property.insert("description".into(), json!(description));
            }
            if let Some(ref default) = arg.default {
                if !default.is_null() {
                    property.insert("default".into(), default.clone());
                }
            }
            properties.insert(arg.name.clone(), Value::Object(property));

            if arg.required {
                required.push(json!(arg.name));
            }
        }

        Self {
            name: func.name.clone(),
            description: func.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
            chain: func.chain,
        }
    }
}

/// Decode the raw argument text of a function call.
///
/// Models occasionally send an empty string for argument-less calls; that is
/// read as an empty object.
pub fn parse_arguments(raw: &str) -> std::result::Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(raw)
}

/// Execute an endpoint function and return its JSON-decoded response body.
///
/// Arguments go to the query string or the JSON body as declared. Any
/// failure (unreachable host, non-2xx status, non-JSON body) is an
/// [`PipelineError::ExternalCall`].
pub async fn call_endpoint(client: &Client, func: &FunctionSpec, arguments: &Value) -> Result<Value> {
    let FunctionTarget::Endpoint {
        url,
        method,
        payload,
        headers,
    } = &func.target
    else {
        return Err(PipelineError::InvalidConfig(format!(
            "function '{}' is external and cannot be called by the pipeline",
            func.name
        )));
    };

    let fail = |message: String| PipelineError::ExternalCall {
        function: func.name.clone(),
        message,
    };

    let mut req = client.request((*method).into(), url.as_str());
    for (key, value) in headers {
        req = req.header(key.as_str(), value.as_str());
    }
    req = match payload {
        PayloadPlacement::Query => req.query(&query_pairs(arguments)),
        PayloadPlacement::Body => req.json(arguments),
    };

    tracing::debug!(function = %func.name, url = %url, "calling endpoint function");

    let resp = req
        .send()
        .await
        .map_err(|e| fail(format!("failed to reach {}: {}", url, e)))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(fail(format!("HTTP {}: {}", status.as_u16(), body)));
    }

    let text = resp
        .text()
        .await
        .map_err(|e| fail(format!("failed to read response: {}", e)))?;
    serde_json::from_str(&text).map_err(|e| fail(format!("response is not JSON: {}", e)))
}

/// Flatten an arguments object into query pairs. Strings are sent as-is,
/// everything else as JSON text.
fn query_pairs(arguments: &Value) -> Vec<(String, String)> {
    let Some(map) = arguments.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}
