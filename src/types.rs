//! Generator definitions: the declarative input of one generation request.
//!
//! Every type here is `serde` (de)serializable so a [`GeneratorSpec`] can be
//! taken straight from a request body. Field names follow the wire format
//! (`camelCase` where the wire uses it).

use crate::backend::ChatMessage;
use crate::error::Result;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Model used when a spec does not name one.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// The full declarative input of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSpec {
    pub instructions: Instructions,
    #[serde(default)]
    pub settings: Settings,
    /// Ordered processing steps. `None` behaves like `[generate]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<Vec<FlowStep>>,
    /// Payload sent as the final user turn.
    #[serde(default)]
    pub data: Value,
    /// Caller-supplied values for the declared instruction options.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub options: HashMap<String, Value>,
    /// Prior conversation turns, for continuing a function chain.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<ChatMessage>,
}

impl GeneratorSpec {
    /// Parse a spec from a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Parse a spec from a YAML document.
    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).map_err(|e| {
            crate::PipelineError::InvalidConfig(format!("invalid generator YAML: {}", e))
        })
    }

    /// The flow steps, with a missing flow read as an empty list.
    pub fn flow_steps(&self) -> &[FlowStep] {
        self.flow.as_deref().unwrap_or(&[])
    }

    /// Modules referenced by `process` steps, in flow order.
    pub fn process_steps(&self) -> impl Iterator<Item = &ModuleRef> {
        self.flow_steps().iter().filter_map(|step| match step {
            FlowStep::Process { module } => Some(module),
            FlowStep::Generate => None,
        })
    }

    /// Look up a declared function by name.
    pub fn function(&self, name: &str) -> Option<&FunctionSpec> {
        self.instructions.functions.iter().find(|f| f.name == name)
    }

    /// Return a copy with the output schemas replaced.
    pub fn with_output(&self, output: Vec<OutputSchema>) -> Self {
        let mut next = self.clone();
        next.instructions.output = output;
        next
    }

    /// Return a copy with extra turns appended to the history.
    pub fn with_history(&self, turns: impl IntoIterator<Item = ChatMessage>) -> Self {
        let mut next = self.clone();
        next.history.extend(turns);
        next
    }
}

/// What the model is asked to do and how its answer must look.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instructions {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub information: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Example>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionSpec>,
    /// One or many accepted response schemas.
    #[serde(deserialize_with = "one_or_many")]
    pub output: Vec<OutputSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionSpec>,
}

/// A worked input/output pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub input: Value,
    pub output: Value,
}

/// A named option the prompt exposes to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ValueType,
    /// When set, the default always wins over the caller's value.
    #[serde(default)]
    pub constant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// An accepted response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: Value,
}

impl OutputSchema {
    pub fn new(schema: Value) -> Self {
        Self {
            description: None,
            schema,
        }
    }
}

/// JSON value types accepted for options and function arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Object => "object",
            ValueType::Array => "array",
        }
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<FunctionArgument>,
    /// Re-invoke the model with the function result appended to history.
    #[serde(default)]
    pub chain: bool,
    #[serde(flatten)]
    pub target: FunctionTarget,
}

/// Where a declared function runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FunctionTarget {
    /// Executed by the pipeline through an HTTP call.
    Endpoint {
        url: String,
        method: HttpMethod,
        payload: PayloadPlacement,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    /// Executed by the caller; the pipeline only reports the call.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Whether endpoint arguments travel in the query string or the JSON body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadPlacement {
    Query,
    Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: ValueType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Model and run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_model")]
    pub model: String,
    /// Provider credential. Falls back to the backend's own key when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Retry bound; the context default applies when absent. `Some(0)`
    /// means a single attempt with no retries, not "use the default".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    /// `Some(false)` disables the built-in example.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<bool>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            retries: None,
            stream: false,
            example: None,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

/// One step of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FlowStep {
    Generate,
    Process { module: ModuleRef },
}

impl FlowStep {
    /// Shorthand for a `process` step.
    pub fn process(name: impl Into<String>, options: Map<String, Value>) -> Self {
        FlowStep::Process {
            module: ModuleRef {
                name: name.into(),
                options,
            },
        }
    }
}

/// A module reference inside a flow, with caller-supplied options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<OutputSchema>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(OutputSchema),
        Many(Vec<OutputSchema>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(schema) => vec![schema],
        OneOrMany::Many(schemas) => schemas,
    })
}
