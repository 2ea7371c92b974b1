//! Static table of built-in modules.

use super::{Analysis, Carbon, Compliance, Moderation, Module, Phase};
use serde_json::{json, Map, Value};

/// Default value of a module option.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionDefault {
    Bool(bool),
    Number(f64),
    Str(&'static str),
}

impl OptionDefault {
    pub fn to_value(self) -> Value {
        match self {
            OptionDefault::Bool(b) => json!(b),
            OptionDefault::Number(n) => json!(n),
            OptionDefault::Str(s) => json!(s),
        }
    }
}

/// A declared module option.
#[derive(Debug, Clone, Copy)]
pub struct OptionDefinition {
    pub name: &'static str,
    pub default: OptionDefault,
    pub required: bool,
    pub description: &'static str,
}

/// A registered module and its metadata.
pub struct ModuleEntry {
    /// Identifier used in flows.
    pub key: &'static str,
    /// Display name, used in error messages and the audit trail.
    pub name: &'static str,
    pub description: &'static str,
    pub information: &'static str,
    pub phase: Phase,
    pub options: &'static [OptionDefinition],
    pub module: &'static dyn Module,
}

impl std::fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("key", &self.key)
            .field("phase", &self.phase)
            .field("options", &self.options)
            .finish()
    }
}

const RETRY_OPTION: OptionDefinition = OptionDefinition {
    name: "retry",
    default: OptionDefault::Bool(true),
    required: false,
    description: "Retry the generation when this module rejects it",
};

pub static REGISTRY: &[ModuleEntry] = &[
    ModuleEntry {
        key: "analysis",
        name: "Analysis",
        description: "Asks the model for a short analysis alongside its answer",
        information: "Adds a required `_analysis` string to every output schema. \
            Improves answer quality at the price of more completion tokens.",
        phase: Phase::Pre,
        options: &[],
        module: &Analysis,
    },
    ModuleEntry {
        key: "compliance",
        name: "Compliance",
        description: "Checks the answer against the declared output schemas",
        information: "JSON answers must match at least one output schema; function \
            calls must match the function's argument schema.",
        phase: Phase::Post,
        options: &[RETRY_OPTION],
        module: &Compliance,
    },
    ModuleEntry {
        key: "moderation",
        name: "Moderation",
        description: "Rejects answers flagged by the moderation service",
        information: "Submits the answer text to the moderation service. \
            Costs $0.005 per call.",
        phase: Phase::Post,
        options: &[RETRY_OPTION],
        module: &Moderation,
    },
    ModuleEntry {
        key: "carbon",
        name: "Carbon",
        description: "Offsets the carbon footprint of the generation",
        information: "Adds a fixed $0.001 surcharge to the run cost.",
        phase: Phase::Post,
        options: &[],
        module: &Carbon,
    },
];

/// Find a module by key.
pub fn lookup(key: &str) -> Option<&'static ModuleEntry> {
    REGISTRY.iter().find(|entry| entry.key == key)
}

/// Resolve every declared option: the supplied value when present, the
/// default otherwise. Unknown supplied keys are dropped.
pub fn resolve_options(defs: &[OptionDefinition], supplied: &Map<String, Value>) -> Map<String, Value> {
    defs.iter()
        .map(|def| {
            let value = supplied
                .get(def.name)
                .cloned()
                .unwrap_or_else(|| def.default.to_value());
            (def.name.to_string(), value)
        })
        .collect()
}
