//! Query-to-action dispatch
//!
//! Turns one utterance into an answer by calling the model, running any tool
//! calls it asks for against the bound gateways, and feeding the results back
//! until the model answers directly or the iteration cap is hit.

mod dispatcher;
mod turn;

pub use dispatcher::Dispatcher;
pub use turn::{ConversationTurn, FailureKind, FinalAnswer, ModelOutcome, ToolExchange, ToolOutcome, ToolResult};

use crate::llm::LlmError;

pub const DEFAULT_MAX_ITERATIONS: usize = 6;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Use the available tools to look up facts before answering.";

/// Errors that end a dispatch cycle
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No final answer after {limit} model calls")]
    IterationLimitExceeded { limit: usize },

    #[error("Model API error: {0}")]
    ModelApi(#[from] LlmError),
}

impl DispatchError {
    pub fn is_iteration_limit(&self) -> bool {
        matches!(self, DispatchError::IterationLimitExceeded { .. })
    }
}

/// Settings for a [`Dispatcher`]
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Model calls allowed per utterance
    pub max_iterations: usize,
    pub max_tokens: u32,
    pub system_prompt: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }
}
