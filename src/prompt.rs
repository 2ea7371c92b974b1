//! Prompt compiler: generator spec → chat messages + function declarations.
//!
//! [`compile`] is a pure function of its input. Message layout:
//!
//! ```text
//! [canonical example]      only without caller examples, unless disabled
//! system: instructions     CONTEXT / USEFUL INFORMATION / CONSTRAINTS /
//!                          RESPONSE FORMATS / OPTIONS
//! [caller examples]        user/assistant pairs
//! [history]
//! user: data
//! ```

use crate::backend::ChatMessage;
use crate::function::FunctionDeclaration;
use crate::types::{GeneratorSpec, Instructions, OptionSpec, OutputSchema, ValueType};
use serde_json::{json, Value};
use std::collections::HashMap;

const CONSTRAINTS: &str = "The response must be either a Function Call or valid JSON complying \
with one of the Response schemas below. Don't include formatting, just valid JSON.";

/// Compiled model input.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPrompt {
    pub messages: Vec<ChatMessage>,
    pub functions: Vec<FunctionDeclaration>,
}

impl CompiledPrompt {
    /// Look up a compiled declaration by name.
    pub fn function(&self, name: &str) -> Option<&FunctionDeclaration> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Compile a generator spec into the transport's input.
pub fn compile(spec: &GeneratorSpec) -> CompiledPrompt {
    let mut messages = context_messages(spec);
    messages.extend(spec.history.iter().cloned());
    messages.push(ChatMessage::user(render_data(&spec.data)));

    CompiledPrompt {
        messages,
        functions: spec
            .instructions
            .functions
            .iter()
            .map(FunctionDeclaration::from)
            .collect(),
    }
}

fn context_messages(spec: &GeneratorSpec) -> Vec<ChatMessage> {
    let instructions = ChatMessage::system(render_instructions(&spec.instructions, &spec.options));

    if !spec.instructions.examples.is_empty() {
        let mut messages = vec![instructions];
        for example in &spec.instructions.examples {
            messages.push(ChatMessage::user(render_data(&example.input)));
            messages.push(ChatMessage::assistant(render_data(&example.output)));
        }
        messages
    } else if spec.settings.example != Some(false) {
        let mut messages = canonical_example();
        messages.push(instructions);
        messages
    } else {
        vec![instructions]
    }
}

/// Render the instruction block.
pub fn render_instructions(instructions: &Instructions, options: &HashMap<String, Value>) -> String {
    let mut context = instructions.prompt.clone();
    if let Some(ref extra) = instructions.context {
        context.push('\n');
        context.push_str(extra);
    }

    let mut sections = vec![section("CONTEXT", &context)];
    if let Some(ref information) = instructions.information {
        sections.push(section("USEFUL INFORMATION", information));
    }
    sections.push(inline("CONSTRAINTS", CONSTRAINTS));
    sections.push(inline("RESPONSE FORMATS", &render_formats(&instructions.output)));
    if let Some(rendered) = render_options(&instructions.options, options) {
        sections.push(section("OPTIONS", &rendered));
    }

    sections.join("\n\n")
}

fn render_formats(output: &[OutputSchema]) -> String {
    serde_json::to_string(output).unwrap_or_else(|_| "[]".to_string())
}

/// Render declared options with their effective values.
///
/// Returns `None` when nothing is declared. Constant options always use
/// their default; others use the caller's value, then the default. Options
/// without any value are left out.
pub fn render_options(declared: &[OptionSpec], supplied: &HashMap<String, Value>) -> Option<String> {
    if declared.is_empty() {
        return None;
    }

    let lines: Vec<String> = declared
        .iter()
        .filter_map(|option| {
            let value = if option.constant {
                option.default.as_ref()
            } else {
                supplied.get(&option.name).or(option.default.as_ref())
            }?;
            Some(format!(
                "<{}>: {}\n{}",
                option.name.to_lowercase(),
                render_data(value),
                option.description
            ))
        })
        .collect();

    Some(lines.join("\n"))
}

/// Render a JSON value as message text: strings verbatim, anything else as JSON.
pub fn render_data(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fixed request/response pair anchoring the output format.
pub fn canonical_example() -> Vec<ChatMessage> {
    let instructions = Instructions {
        prompt: "Find emails from potential customers, and generate a response to send to them"
            .to_string(),
        context: Some("We are a company that sells a marketing software".to_string()),
        information: None,
        examples: Vec::new(),
        options: vec![
            OptionSpec {
                name: "language".into(),
                description: "The language of the response".into(),
                kind: ValueType::String,
                constant: false,
                default: Some(json!("english")),
            },
            OptionSpec {
                name: "tone".into(),
                description: "The tone of the response".into(),
                kind: ValueType::String,
                constant: false,
                default: Some(json!("formal")),
            },
        ],
        output: vec![OutputSchema::new(json!({
            "type": "object",
            "properties": {
                "is_potential_customer": {
                    "type": "boolean",
                    "description": "Whether the email is from a potential customer"
                },
                "response_mail": {
                    "type": "string",
                    "description": "The response to send by email, in case he is a potential customer"
                }
            },
            "required": ["is_potential_customer"]
        }))],
        functions: Vec::new(),
    };

    let request = json!({
        "from_name": "John Doe",
        "email_body": "Hello Jack, thank you for contacting us. We just opened a ticket for you. \
We will get back to you as soon as possible. Best regards, John Doe"
    });

    vec![
        ChatMessage::system(render_instructions(&instructions, &HashMap::new())),
        ChatMessage::user(request.to_string()),
        ChatMessage::assistant(json!({"is_potential_customer": false}).to_string()),
    ]
}

/// Wrap text in a labeled block.
pub fn section(label: &str, content: &str) -> String {
    format!("{}:\n{}", label, content)
}

fn inline(label: &str, content: &str) -> String {
    format!("{}: {}", label, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Role;
    use crate::types::{Example, FunctionArgument, FunctionSpec, FunctionTarget, Settings};

    fn spec() -> GeneratorSpec {
        GeneratorSpec {
            instructions: Instructions {
                prompt: "Summarize the ticket".into(),
                context: Some("Support desk".into()),
                information: None,
                examples: Vec::new(),
                options: Vec::new(),
                output: vec![OutputSchema::new(json!({
                    "type": "object",
                    "properties": {"summary": {"type": "string"}},
                    "required": ["summary"]
                }))],
                functions: Vec::new(),
            },
            settings: Settings::default(),
            flow: None,
            data: json!({"ticket": "printer on fire"}),
            options: HashMap::new(),
            history: Vec::new(),
        }
    }

    #[test]
    fn test_section() {
        assert_eq!(section("CONTEXT", "Some knowledge"), "CONTEXT:\nSome knowledge");
    }

    #[test]
    fn test_compile_is_deterministic() {
        let mut spec = spec();
        spec.instructions.functions.push(FunctionSpec {
            name: "escalate".into(),
            description: "Escalate".into(),
            arguments: vec![FunctionArgument {
                name: "level".into(),
                description: None,
                kind: ValueType::Number,
                required: true,
                default: None,
            }],
            chain: false,
            target: FunctionTarget::External,
        });
        spec.options.insert("tone".into(), json!("dry"));
        assert_eq!(compile(&spec), compile(&spec));
    }

    #[test]
    fn test_canonical_example_prepended_by_default() {
        let compiled = compile(&spec());
        // example system/user/assistant + instructions + data
        assert_eq!(compiled.messages.len(), 5);
        assert_eq!(compiled.messages[0].role, Role::System);
        assert_eq!(compiled.messages[2].role, Role::Assistant);
        let instructions = compiled.messages[3].content.as_deref().unwrap();
        assert!(instructions.starts_with("CONTEXT:\nSummarize the ticket\nSupport desk"));
        assert!(instructions.contains("CONSTRAINTS: The response must be"));
        assert!(instructions.contains(r#"RESPONSE FORMATS: [{"schema":"#));
        assert!(!instructions.contains("OPTIONS"));
        assert!(!instructions.contains("USEFUL INFORMATION"));
        assert_eq!(
            compiled.messages[4],
            ChatMessage::user(r#"{"ticket":"printer on fire"}"#)
        );
    }

    #[test]
    fn test_canonical_example_can_be_disabled() {
        let mut spec = spec();
        spec.settings.example = Some(false);
        let compiled = compile(&spec);
        assert_eq!(compiled.messages.len(), 2);
        assert_eq!(compiled.messages[0].role, Role::System);
    }

    #[test]
    fn test_caller_examples_follow_instructions() {
        let mut spec = spec();
        spec.instructions.examples = vec![Example {
            input: json!("my printer is on fire"),
            output: json!({"summary": "fire"}),
        }];
        let compiled = compile(&spec);
        assert_eq!(compiled.messages.len(), 4);
        assert!(compiled.messages[0].content.as_deref().unwrap().starts_with("CONTEXT:"));
        assert_eq!(compiled.messages[1], ChatMessage::user("my printer is on fire"));
        assert_eq!(compiled.messages[2], ChatMessage::assistant(r#"{"summary":"fire"}"#));
    }

    #[test]
    fn test_history_goes_before_data() {
        let mut spec = spec();
        spec.settings.example = Some(false);
        spec.data = json!("plain text");
        spec.history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")];
        let compiled = compile(&spec);
        assert_eq!(compiled.messages.len(), 4);
        assert_eq!(compiled.messages[1], ChatMessage::user("earlier"));
        assert_eq!(compiled.messages[3], ChatMessage::user("plain text"));
    }

    #[test]
    fn test_information_section() {
        let mut spec = spec();
        spec.instructions.information = Some("Tickets are in French".into());
        let text = render_instructions(&spec.instructions, &spec.options);
        assert!(text.contains("USEFUL INFORMATION:\nTickets are in French"));
    }

    #[test]
    fn test_render_options_values() {
        let declared = vec![
            OptionSpec {
                name: "Language".into(),
                description: "Reply language".into(),
                kind: ValueType::String,
                constant: false,
                default: Some(json!("english")),
            },
            OptionSpec {
                name: "max_words".into(),
                description: "Word budget".into(),
                kind: ValueType::Number,
                constant: true,
                default: Some(json!(50)),
            },
            OptionSpec {
                name: "audience".into(),
                description: "Who reads it".into(),
                kind: ValueType::String,
                constant: false,
                default: None,
            },
        ];
        let mut supplied = HashMap::new();
        supplied.insert("Language".to_string(), json!("french"));
        supplied.insert("max_words".to_string(), json!(500));

        let rendered = render_options(&declared, &supplied).unwrap();
        assert_eq!(
            rendered,
            "<language>: french\nReply language\n<max_words>: 50\nWord budget"
        );
        assert!(render_options(&[], &supplied).is_none());
    }

    #[test]
    fn test_render_data() {
        assert_eq!(render_data(&json!("raw")), "raw");
        assert_eq!(render_data(&json!([1, 2])), "[1,2]");
        assert_eq!(render_data(&json!(42)), "42");
    }

    #[test]
    fn test_functions_compiled_with_chain() {
        let mut spec = spec();
        spec.instructions.functions.push(FunctionSpec {
            name: "lookup".into(),
            description: "Look up".into(),
            arguments: Vec::new(),
            chain: true,
            target: FunctionTarget::External,
        });
        let compiled = compile(&spec);
        assert!(compiled.function("lookup").unwrap().chain);
        assert!(compiled.function("missing").is_none());
    }
}
