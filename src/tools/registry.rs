//! Tool schema registry
//!
//! Holds the tool specs offered to the model, in registration order, and
//! checks model tool calls against them before anything is dispatched.

use std::collections::HashMap;

use serde_json::Value;

use crate::llm::{ToolCall, ToolDefinition};

use super::definition::{ParamType, ToolSpec};

/// Errors raised while building the registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool already registered: {name}")]
    DuplicateTool { name: String },
}

/// Reasons a tool call is rejected before dispatch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Tool '{tool}' expects a JSON object of arguments")]
    NotAnObject { tool: String },

    #[error("Tool '{tool}' missing required argument: {argument}")]
    MissingArgument { tool: String, argument: String },

    #[error("Tool '{tool}' has no parameter named '{argument}'")]
    UnexpectedArgument { tool: String, argument: String },

    #[error("Tool '{tool}' argument '{argument}' must be of type {expected}")]
    TypeMismatch {
        tool: String,
        argument: String,
        expected: ParamType,
    },
}

impl ValidationError {
    pub fn is_unknown_tool(&self) -> bool {
        matches!(self, ValidationError::UnknownTool { .. })
    }
}

/// Registry of tool specs, in registration order
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool; names must be unique
    pub fn register(&mut self, spec: ToolSpec) -> Result<(), RegistryError> {
        if self.index.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateTool { name: spec.name });
        }
        self.index.insert(spec.name.clone(), self.specs.len());
        self.specs.push(spec);
        Ok(())
    }

    /// All specs, in registration order
    pub fn describe_all(&self) -> &[ToolSpec] {
        &self.specs
    }

    /// Specs converted for the LLM request
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.specs.iter().map(ToolSpec::to_llm_definition).collect()
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// List all tool names, in registration order
    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Check a tool call against its declared spec.
    ///
    /// A required argument given as `null` counts as missing.
    pub fn validate(&self, call: &ToolCall) -> Result<&ToolSpec, ValidationError> {
        let spec = self.get(&call.name).ok_or_else(|| ValidationError::UnknownTool {
            name: call.name.clone(),
        })?;

        let args = call.input.as_object().ok_or_else(|| ValidationError::NotAnObject {
            tool: spec.name.clone(),
        })?;

        for (argument, value) in args {
            let param = spec.param(argument).ok_or_else(|| ValidationError::UnexpectedArgument {
                tool: spec.name.clone(),
                argument: argument.clone(),
            })?;
            if value.is_null() && !param.required {
                continue;
            }
            if !value.is_null() && !param.param_type.accepts(value) {
                return Err(ValidationError::TypeMismatch {
                    tool: spec.name.clone(),
                    argument: argument.clone(),
                    expected: param.param_type,
                });
            }
        }

        for param in spec.required_params() {
            if args.get(&param.name).is_none_or(Value::is_null) {
                return Err(ValidationError::MissingArgument {
                    tool: spec.name.clone(),
                    argument: param.name.clone(),
                });
            }
        }

        Ok(spec)
    }
}
