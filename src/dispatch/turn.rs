//! Per-turn data: model outcomes, tool results and the conversation turn

use serde_json::{Value, json};

use crate::gateway::{GatewayError, ToolPayload};
use crate::llm::{CompletionResponse, ContentBlock, Message, Role, ToolCall};
use crate::tools::ValidationError;

/// What one model call asked for
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutcome {
    DirectAnswer(String),
    ToolCalls(Vec<ToolCall>),
}

impl From<&CompletionResponse> for ModelOutcome {
    fn from(response: &CompletionResponse) -> Self {
        if response.tool_calls.is_empty() {
            ModelOutcome::DirectAnswer(response.content.clone())
        } else {
            ModelOutcome::ToolCalls(response.tool_calls.clone())
        }
    }
}

/// Category of a failed tool call, reported to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    UnknownTool,
    NotFound,
    QueryExecution,
    ReadOnlyViolation,
    InvalidArgument,
    Upstream,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation_error",
            FailureKind::UnknownTool => "unknown_tool",
            FailureKind::NotFound => "not_found",
            FailureKind::QueryExecution => "query_execution_error",
            FailureKind::ReadOnlyViolation => "read_only_violation",
            FailureKind::InvalidArgument => "invalid_argument",
            FailureKind::Upstream => "upstream_error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ValidationError> for FailureKind {
    fn from(e: &ValidationError) -> Self {
        if e.is_unknown_tool() {
            FailureKind::UnknownTool
        } else {
            FailureKind::Validation
        }
    }
}

impl From<&GatewayError> for FailureKind {
    fn from(e: &GatewayError) -> Self {
        match e {
            GatewayError::NotFound(_) => FailureKind::NotFound,
            GatewayError::QueryExecution(_) => FailureKind::QueryExecution,
            GatewayError::ReadOnlyViolation(_) => FailureKind::ReadOnlyViolation,
            GatewayError::InvalidArgument(_) => FailureKind::InvalidArgument,
            GatewayError::Upstream(_) => FailureKind::Upstream,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(ToolPayload),
    Failure { kind: FailureKind, message: String },
}

/// Outcome of one tool call, answering the tool_use with `tool_use_id`
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, payload: ToolPayload) -> Self {
        Self {
            tool_use_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Success(payload),
        }
    }

    pub fn failure(call: &ToolCall, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            tool_use_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Failure {
                kind,
                message: message.into(),
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Failure { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            ToolOutcome::Failure { kind, .. } => Some(*kind),
            ToolOutcome::Success(_) => None,
        }
    }

    /// JSON handed to the model
    pub fn to_model_json(&self) -> Value {
        match &self.outcome {
            ToolOutcome::Success(payload) => payload.to_model_json(),
            ToolOutcome::Failure { kind, message } => json!({
                "error": kind.as_str(),
                "message": message,
            }),
        }
    }

    pub fn to_content_block(&self) -> ContentBlock {
        ContentBlock::tool_result(
            self.tool_use_id.clone(),
            self.to_model_json().to_string(),
            self.is_failure(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolExchange {
    pub request: ToolCall,
    pub result: ToolResult,
}

/// Everything one `handle` call accumulates. Dropped once the answer is out.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    utterance: String,
    messages: Vec<Message>,
    exchanges: Vec<ToolExchange>,
    model_calls: usize,
}

impl ConversationTurn {
    pub fn new(utterance: impl Into<String>) -> Self {
        let utterance = utterance.into();
        Self {
            messages: vec![Message::user(utterance.clone())],
            utterance,
            exchanges: Vec::new(),
            model_calls: 0,
        }
    }

    pub fn utterance(&self) -> &str {
        &self.utterance
    }

    /// Messages for the next model request: the utterance, then each
    /// assistant tool_use message followed by its tool results
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn exchanges(&self) -> &[ToolExchange] {
        &self.exchanges
    }

    pub fn model_calls(&self) -> usize {
        self.model_calls
    }

    pub fn record_model_call(&mut self) {
        self.model_calls += 1;
    }

    /// True if an earlier exchange in this turn made the same call
    pub fn has_seen(&self, call: &ToolCall) -> bool {
        self.exchanges
            .iter()
            .any(|e| e.request.name == call.name && e.request.input == call.input)
    }

    /// Append one round of tool use
    pub fn record(&mut self, response: &CompletionResponse, exchanges: Vec<ToolExchange>) {
        self.messages.push(response.to_assistant_message());
        let blocks = exchanges.iter().map(|e| e.result.to_content_block()).collect();
        self.messages.push(Message::blocks(Role::User, blocks));
        self.exchanges.extend(exchanges);
    }

    pub fn finish(self, text: String) -> FinalAnswer {
        FinalAnswer {
            text,
            iterations: self.model_calls,
            tool_calls: self.exchanges.len(),
        }
    }
}

/// The model's answer and what it took to get there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalAnswer {
    pub text: String,
    /// Model calls made
    pub iterations: usize,
    /// Tool calls dispatched, including rejected ones
    pub tool_calls: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RowSet;
    use crate::llm::MessageContent;

    fn call() -> ToolCall {
        ToolCall::new("toolu_1", "get_weather", json!({"city": "Nowhereville"}))
    }

    #[test]
    fn test_outcome_classification() {
        let direct = CompletionResponse::text("Hello");
        assert_eq!(ModelOutcome::from(&direct), ModelOutcome::DirectAnswer("Hello".into()));

        let tools = CompletionResponse::tool_use(vec![call()]);
        assert!(matches!(ModelOutcome::from(&tools), ModelOutcome::ToolCalls(calls) if calls.len() == 1));
    }

    #[test]
    fn test_failure_kind_mapping() {
        let unknown = ValidationError::UnknownTool { name: "x".into() };
        assert_eq!(FailureKind::from(&unknown), FailureKind::UnknownTool);

        let missing = ValidationError::MissingArgument {
            tool: "get_weather".into(),
            argument: "city".into(),
        };
        assert_eq!(FailureKind::from(&missing), FailureKind::Validation);

        assert_eq!(
            FailureKind::from(&GatewayError::ReadOnlyViolation("DROP".into())),
            FailureKind::ReadOnlyViolation
        );
        assert_eq!(FailureKind::from(&GatewayError::NotFound("x".into())), FailureKind::NotFound);
    }

    #[test]
    fn test_failure_result_block() {
        let result = ToolResult::failure(&call(), FailureKind::NotFound, "city 'Nowhereville' not found");
        match result.to_content_block() {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "toolu_1");
                assert!(is_error);
                let parsed: Value = serde_json::from_str(&content).unwrap();
                assert_eq!(parsed["error"], "not_found");
            }
            other => panic!("unexpected block: {:?}", other),
        }
    }

    #[test]
    fn test_turn_records_history() {
        let mut turn = ConversationTurn::new("Weather in Nowhereville?");
        assert_eq!(turn.messages().len(), 1);

        let response = CompletionResponse::tool_use(vec![call()]);
        turn.record_model_call();
        turn.record(
            &response,
            vec![ToolExchange {
                request: call(),
                result: ToolResult::success(&call(), ToolPayload::Rows(RowSet::default())),
            }],
        );

        assert_eq!(turn.messages().len(), 3);
        assert_eq!(turn.messages()[1].role, Role::Assistant);
        assert!(matches!(&turn.messages()[2].content, MessageContent::Blocks(b) if b.len() == 1));
        assert!(turn.has_seen(&call()));
        assert!(!turn.has_seen(&ToolCall::new("toolu_2", "get_weather", json!({"city": "Sofia"}))));

        let answer = turn.finish("No such city".into());
        assert_eq!(answer.iterations, 1);
        assert_eq!(answer.tool_calls, 1);
    }
}
