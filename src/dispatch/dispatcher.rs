//! The bounded model/tool loop

use std::collections::HashMap;
use std::sync::Arc;

use crate::gateway::Gateway;
use crate::llm::{CompletionRequest, LlmClient, ToolCall};
use crate::tools::{RegistryError, ToolRegistry, ToolSpec};

use super::turn::{ConversationTurn, FailureKind, FinalAnswer, ModelOutcome, ToolExchange, ToolResult};
use super::{DispatchConfig, DispatchError};

/// Routes one utterance at a time through the model and the gateways.
///
/// Each `handle` call is sequential: model call, then the requested tool
/// calls in order, then the next model call. Nothing carries over between
/// calls, so one dispatcher can serve concurrent callers behind an `Arc`.
pub struct Dispatcher<L: LlmClient> {
    llm: Arc<L>,
    registry: ToolRegistry,
    gateways: HashMap<String, Arc<dyn Gateway>>,
    config: DispatchConfig,
}

impl<L: LlmClient> Dispatcher<L> {
    pub fn new(llm: Arc<L>, config: DispatchConfig) -> Self {
        Self {
            llm,
            registry: ToolRegistry::new(),
            gateways: HashMap::new(),
            config,
        }
    }

    /// Register every tool the gateway declares and bind them to it
    pub fn with_gateway(mut self, gateway: Arc<dyn Gateway>) -> Result<Self, RegistryError> {
        for spec in gateway.tools() {
            let name = spec.name.clone();
            self.registry.register(spec)?;
            log::debug!("Bound tool {} to {} gateway", name, gateway.name());
            self.gateways.insert(name, Arc::clone(&gateway));
        }
        Ok(self)
    }

    /// Register a tool with no gateway behind it
    pub fn with_tool(mut self, spec: ToolSpec) -> Result<Self, RegistryError> {
        self.registry.register(spec)?;
        Ok(self)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn llm(&self) -> &Arc<L> {
        &self.llm
    }

    /// Answer one utterance
    pub async fn handle(&self, utterance: &str) -> Result<FinalAnswer, DispatchError> {
        let mut turn = ConversationTurn::new(utterance);
        let tools = self.registry.definitions();
        let limit = self.config.max_iterations;

        log::info!("Handling utterance: {}", turn.utterance());

        while turn.model_calls() < limit {
            let request = CompletionRequest::new(self.config.system_prompt.as_str())
                .with_messages(turn.messages().iter().cloned())
                .with_tools(tools.clone())
                .with_max_tokens(self.config.max_tokens);

            log::debug!(
                "Model call {}/{} with {} message(s)",
                turn.model_calls() + 1,
                limit,
                request.messages.len()
            );
            let response = self.llm.complete(request).await.map_err(|e| {
                log::error!("Model call failed: {}", e);
                DispatchError::ModelApi(e)
            })?;
            turn.record_model_call();

            match ModelOutcome::from(&response) {
                ModelOutcome::DirectAnswer(text) => {
                    let answer = turn.finish(text);
                    log::info!(
                        "Answered after {} model call(s) and {} tool call(s)",
                        answer.iterations,
                        answer.tool_calls
                    );
                    return Ok(answer);
                }
                ModelOutcome::ToolCalls(calls) => {
                    let mut exchanges = Vec::with_capacity(calls.len());
                    for call in calls {
                        if turn.has_seen(&call) {
                            log::warn!("Model repeated tool call {} with {}", call.name, call.input);
                        }
                        let result = self.execute(&call).await;
                        exchanges.push(ToolExchange { request: call, result });
                    }
                    turn.record(&response, exchanges);
                }
            }
        }

        log::error!("Iteration limit of {} reached without a final answer", limit);
        Err(DispatchError::IterationLimitExceeded { limit })
    }

    /// Validate and run one tool call. Failures become failure results.
    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let spec = match self.registry.validate(call) {
            Ok(spec) => spec,
            Err(e) => {
                log::warn!("Rejected tool call {}: {}", call.name, e);
                return ToolResult::failure(call, FailureKind::from(&e), e.to_string());
            }
        };

        let Some(gateway) = self.gateways.get(&spec.name) else {
            log::warn!("No gateway bound to tool {}", spec.name);
            return ToolResult::failure(
                call,
                FailureKind::UnknownTool,
                format!("Tool {} is not available", spec.name),
            );
        };

        let Some(args) = call.input.as_object() else {
            return ToolResult::failure(call, FailureKind::Validation, "Tool input must be a JSON object");
        };

        log::info!("Calling tool {} with {}", call.name, call.input);
        match gateway.invoke(&spec.name, args).await {
            Ok(payload) => {
                log::info!("Tool {} returned {}", call.name, payload.summary());
                ToolResult::success(call, payload)
            }
            Err(e) => {
                log::warn!("Tool {} failed: {}", call.name, e);
                ToolResult::failure(call, FailureKind::from(&e), e.to_string())
            }
        }
    }
}
