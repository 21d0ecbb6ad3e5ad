//! Anthropic API client implementation
//!
//! This module implements the LlmClient trait for the Anthropic (Claude) Messages API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::llm::client::{LlmClient, LlmError};
use crate::llm::tool_parser;
use crate::llm::types::{CompletionRequest, CompletionResponse, Usage};

/// Anthropic API endpoint
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Default model to use
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Default max tokens
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Configuration for the Anthropic client
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub api_url: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(120),
            api_url: ANTHROPIC_API_URL.to_string(),
        }
    }
}

/// Anthropic API client
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    config: AnthropicConfig,
    usage: Arc<Mutex<Usage>>,
}

impl AnthropicClient {
    /// Create a new Anthropic client
    ///
    /// Reads ANTHROPIC_API_KEY from environment
    pub fn new(config: AnthropicConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| LlmError::MissingApiKey {
            env_var: API_KEY_ENV.to_string(),
        })?;

        Self::with_api_key(api_key, config)
    }

    /// Create a client with an explicit API key
    pub fn with_api_key(api_key: String, config: AnthropicConfig) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            api_key,
            config,
            usage: Arc::new(Mutex::new(Usage::default())),
        })
    }

    /// Build the request body for the Anthropic API
    fn build_request(&self, request: &CompletionRequest) -> Value {
        let model = request.model.as_ref().unwrap_or(&self.config.model).clone();
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);

        let mut body = json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": request.messages
        });

        if !request.system.is_empty() {
            body["system"] = json!(request.system);
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(|t| t.to_anthropic_schema()).collect();
            body["tools"] = json!(tools);
        }

        body
    }

    /// Parse the API response and record its usage
    fn parse_response(&self, body: Value) -> Result<CompletionResponse, LlmError> {
        let response = tool_parser::parse_response(&body)?;

        if let Ok(mut total) = self.usage.lock() {
            total.add(&response.usage);
        }

        Ok(response)
    }

    /// Send a request to the Anthropic API
    async fn send_request(&self, body: Value) -> Result<Value, LlmError> {
        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match status.as_u16() {
                401 | 403 => LlmError::Authentication {
                    status: status.as_u16(),
                    message,
                },
                code => LlmError::Api { status: code, message },
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    /// Get cumulative token usage
    pub fn total_usage(&self) -> Usage {
        self.usage.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(&request);
        log::debug!(
            "Sending {} message(s) and {} tool(s) to {}",
            request.messages.len(),
            request.tools.len(),
            self.config.model
        );
        let response = self.send_request(body).await?;
        self.parse_response(response)
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_ready(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("model", &self.config.model)
            .field("max_tokens", &self.config.max_tokens)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ContentBlock, Message, Role, StopReason, ToolCall, ToolDefinition};
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use tokio::net::TcpListener;

    fn client() -> AnthropicClient {
        AnthropicClient::with_api_key("test-key".to_string(), AnthropicConfig::default()).unwrap()
    }

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1/messages", addr)
    }

    #[test]
    fn test_config_default() {
        let config = AnthropicConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.api_url, ANTHROPIC_API_URL);
    }

    #[test]
    fn test_client_with_api_key() {
        let client = client();
        assert!(client.is_ready());
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_empty_api_key_not_ready() {
        let client = AnthropicClient::with_api_key(String::new(), AnthropicConfig::default()).unwrap();
        assert!(!client.is_ready());
    }

    #[test]
    fn test_build_request_basic() {
        let request = CompletionRequest::new("You are helpful").with_user_message("Hello");
        let body = client().build_request(&request);

        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["system"], "You are helpful");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Hello");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_build_request_with_tools_and_tool_results() {
        let tool = ToolDefinition::new(
            "get_weather",
            "Get weather",
            json!({"type": "object", "properties": {"city": {"type": "string"}}, "required": ["city"]}),
        );
        let assistant = CompletionResponse::tool_use(vec![ToolCall::new("toolu_1", "get_weather", json!({"city": "Oslo"}))])
            .to_assistant_message();
        let results = Message::blocks(Role::User, vec![ContentBlock::tool_result("toolu_1", "{\"temp\":3}", false)]);

        let request = CompletionRequest::new("sys")
            .with_user_message("Weather in Oslo?")
            .with_message(assistant)
            .with_message(results)
            .with_tools(vec![tool]);
        let body = client().build_request(&request);

        assert_eq!(body["tools"][0]["name"], "get_weather");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"][0]["type"], "tool_use");
        assert_eq!(messages[1]["content"][0]["id"], "toolu_1");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_build_request_custom_model() {
        let mut request = CompletionRequest::new("test").with_user_message("Hello");
        request.model = Some("claude-3-haiku-20240307".to_string());
        request.max_tokens = Some(64);

        let body = client().build_request(&request);
        assert_eq!(body["model"], "claude-3-haiku-20240307");
        assert_eq!(body["max_tokens"], 64);
    }

    #[test]
    fn test_total_usage_accumulation() {
        let client = client();
        for (i, o) in [(100, 50), (200, 100)] {
            client
                .parse_response(json!({
                    "content": [],
                    "stop_reason": "end_turn",
                    "usage": { "input_tokens": i, "output_tokens": o }
                }))
                .unwrap();
        }
        let total = client.total_usage();
        assert_eq!(total.input_tokens, 300);
        assert_eq!(total.output_tokens, 150);
    }

    #[test]
    fn test_debug_impl_hides_key() {
        let debug_str = format!("{:?}", client());
        assert!(debug_str.contains("AnthropicClient"));
        assert!(!debug_str.contains("test-key"));
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AnthropicClient>();
    }

    #[tokio::test]
    async fn test_complete_against_local_server() {
        let app = Router::new().route(
            "/v1/messages",
            post(|headers: HeaderMap, axum::Json(body): axum::Json<Value>| async move {
                assert_eq!(headers.get("x-api-key").unwrap(), "test-key");
                assert_eq!(headers.get("anthropic-version").unwrap(), ANTHROPIC_VERSION);
                assert_eq!(body["messages"][0]["content"], "ping");
                axum::Json(json!({
                    "content": [{"type": "text", "text": "pong"}],
                    "stop_reason": "end_turn",
                    "usage": {"input_tokens": 3, "output_tokens": 1}
                }))
            }),
        );
        let url = serve(app).await;
        let config = AnthropicConfig {
            api_url: url,
            ..Default::default()
        };
        let client = AnthropicClient::with_api_key("test-key".into(), config).unwrap();

        let response = client
            .complete(CompletionRequest::new("sys").with_user_message("ping"))
            .await
            .unwrap();
        assert_eq!(response.content, "pong");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(client.total_usage().total(), 4);
    }

    #[tokio::test]
    async fn test_status_codes_map_to_errors() {
        let app = Router::new()
            .route("/auth/v1/messages", post(|| async { (StatusCode::UNAUTHORIZED, "invalid x-api-key") }))
            .route(
                "/quota/v1/messages",
                post(|| async { (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "7")], "slow down") }),
            )
            .route("/boom/v1/messages", post(|| async { (StatusCode::BAD_GATEWAY, "bad gateway") }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let make = |prefix: &str| {
            let config = AnthropicConfig {
                api_url: format!("http://{}/{}/v1/messages", addr, prefix),
                ..Default::default()
            };
            AnthropicClient::with_api_key("k".into(), config).unwrap()
        };

        let err = make("auth").complete(CompletionRequest::new("s")).await.unwrap_err();
        assert!(matches!(err, LlmError::Authentication { status: 401, .. }));

        let err = make("quota").complete(CompletionRequest::new("s")).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { retry_after } if retry_after == Duration::from_secs(7)));

        let err = make("boom").complete(CompletionRequest::new("s")).await.unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 502, .. }));
    }
}
