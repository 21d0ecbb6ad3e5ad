//! End-to-end dispatch tests
//!
//! A small rule-based model stands in for the LLM: it asks for one tool call,
//! then writes its answer from whatever tool result comes back. Gateways talk
//! to local axum servers that mimic OpenSky and OpenWeatherMap.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::Query;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use skychat::config::Config;
use skychat::dispatch::{DispatchConfig, Dispatcher};
use skychat::gateway::{
    AviationGateway, DatabaseGateway, GatewayError, QueryExecutor, RowSet, SchemaInfo, WeatherGateway,
};
use skychat::llm::{
    CompletionRequest, CompletionResponse, ContentBlock, LlmClient, LlmError, MessageContent, ToolCall,
};
use skychat::project::Project;
use skychat::server;

type Summarize = fn(&Value, bool) -> String;

/// Requests `call` once, then answers from the tool result it was sent
struct RuleModel {
    call: ToolCall,
    summarize: Summarize,
    calls: AtomicUsize,
}

impl RuleModel {
    fn new(call: ToolCall, summarize: Summarize) -> Self {
        Self {
            call,
            summarize,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn last_tool_result(request: &CompletionRequest) -> Option<(Value, bool)> {
    let message = request.messages.last()?;
    let MessageContent::Blocks(blocks) = &message.content else {
        return None;
    };
    blocks.iter().find_map(|b| match b {
        ContentBlock::ToolResult { content, is_error, .. } => {
            serde_json::from_str(content).ok().map(|v| (v, *is_error))
        }
        _ => None,
    })
}

#[async_trait]
impl LlmClient for RuleModel {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match last_tool_result(&request) {
            Some((result, is_error)) => Ok(CompletionResponse::text((self.summarize)(&result, is_error))),
            None => Ok(CompletionResponse::tool_use(vec![self.call.clone()])),
        }
    }

    fn model(&self) -> &str {
        "rule-model"
    }

    fn is_ready(&self) -> bool {
        true
    }
}

fn berlin_call() -> ToolCall {
    ToolCall::new(
        "toolu_berlin",
        "get_aircraft",
        json!({"min_lat": 52.3, "max_lat": 52.7, "min_lon": 13.0, "max_lon": 13.8}),
    )
}

fn count_aircraft(result: &Value, is_error: bool) -> String {
    if is_error {
        return format!("Flight data is unavailable: {}", result["message"]);
    }
    format!("There are {} aircraft flying over Berlin right now.", result["aircraft_count"])
}

fn describe_weather(result: &Value, is_error: bool) -> String {
    if is_error && result["error"] == "not_found" {
        return "I could not find a city called Nowhereville.".to_string();
    }
    format!("It is {} degrees.", result["temperature"]["current"])
}

fn state_vector(icao24: &str, callsign: &str) -> Value {
    json!([icao24, callsign, "Germany", 1700000000, 1700000001, 13.4, 52.5, 10000.0, false, 230.0, 90.0, 0.0, null, 10100.0, null, false, 0])
}

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn mock_opensky() -> String {
    let app = Router::new().route(
        "/states/all",
        get(|Query(params): Query<HashMap<String, String>>| async move {
            assert_eq!(params.get("lamin").map(String::as_str), Some("52.3"));
            assert_eq!(params.get("lomax").map(String::as_str), Some("13.8"));
            axum::Json(json!({
                "time": 1700000001,
                "states": [
                    state_vector("3c6444", "DLH9AB  "),
                    state_vector("3c4b26", "EWG7KL  "),
                    state_vector("4b1805", "SWR1234 "),
                    // No position; dropped during normalization
                    json!(["abcdef", "GHOST   ", "Germany", null, 1700000001, null, null, null, true, 0.0, 0.0, 0.0, null, null, null, false, 0]),
                ]
            }))
        }),
    );
    spawn(app).await
}

async fn mock_openweather() -> String {
    let app = Router::new().route(
        "/data/2.5/weather",
        get(|Query(params): Query<HashMap<String, String>>| async move {
            match params.get("q").map(String::as_str) {
                Some("Sofia") => axum::Json(json!({
                    "name": "Sofia",
                    "dt": 1700000000,
                    "main": {"temp": 12.5, "feels_like": 11.0, "humidity": 71, "pressure": 1016},
                    "wind": {"speed": 3.6, "deg": 250},
                    "weather": [{"description": "broken clouds"}],
                    "sys": {"country": "BG"}
                }))
                .into_response(),
                _ => (
                    StatusCode::NOT_FOUND,
                    axum::Json(json!({"cod": "404", "message": "city not found"})),
                )
                    .into_response(),
            }
        }),
    );
    spawn(app).await
}

#[tokio::test]
async fn test_aircraft_over_berlin() {
    let base_url = mock_opensky().await;
    let gateway = AviationGateway::new(base_url, Duration::from_secs(5)).unwrap();
    let model = Arc::new(RuleModel::new(berlin_call(), count_aircraft));
    let dispatcher = Dispatcher::new(model.clone(), DispatchConfig::default())
        .with_gateway(Arc::new(gateway))
        .unwrap();

    let answer = dispatcher.handle("What aircraft are flying over Berlin?").await.unwrap();

    assert_eq!(answer.text, "There are 3 aircraft flying over Berlin right now.");
    assert_eq!(answer.iterations, 2);
    assert_eq!(answer.tool_calls, 1);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_nowhereville_is_explained_not_fatal() {
    let base_url = mock_openweather().await;
    let gateway = WeatherGateway::new(base_url, "test-key", "metric", Duration::from_secs(5)).unwrap();
    let model = Arc::new(RuleModel::new(
        ToolCall::new("toolu_w", "get_weather", json!({"city": "Nowhereville"})),
        describe_weather,
    ));
    let dispatcher = Dispatcher::new(model, DispatchConfig::default())
        .with_gateway(Arc::new(gateway))
        .unwrap();

    let answer = dispatcher.handle("What's the weather in Nowhereville?").await.unwrap();
    assert_eq!(answer.text, "I could not find a city called Nowhereville.");
}

#[tokio::test]
async fn test_known_city_weather() {
    let base_url = mock_openweather().await;
    let gateway = WeatherGateway::new(base_url, "test-key", "metric", Duration::from_secs(5)).unwrap();
    let model = Arc::new(RuleModel::new(
        ToolCall::new("toolu_w", "get_weather", json!({"city": "Sofia"})),
        describe_weather,
    ));
    let dispatcher = Dispatcher::new(model, DispatchConfig::default())
        .with_gateway(Arc::new(gateway))
        .unwrap();

    let answer = dispatcher.handle("How warm is it in Sofia?").await.unwrap();
    assert_eq!(answer.text, "It is 12.5 degrees.");
}

/// Executor that only counts how often it was asked to run something
#[derive(Default)]
struct CountingExecutor {
    executions: Arc<AtomicUsize>,
}

#[async_trait]
impl QueryExecutor for CountingExecutor {
    async fn fetch_rows(&self, _statement: &str, _max_rows: usize) -> Result<RowSet, GatewayError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(RowSet::default())
    }

    async fn describe_schema(&self) -> Result<SchemaInfo, GatewayError> {
        Ok(SchemaInfo::from_columns(
            vec![("users".into(), "id".into(), "integer".into())],
            vec![],
        ))
    }
}

#[tokio::test]
async fn test_drop_table_rejected_and_reported() {
    let executions = Arc::new(AtomicUsize::new(0));
    let executor = CountingExecutor {
        executions: executions.clone(),
    };
    let gateway = DatabaseGateway::connect(executor, 100).await.unwrap();

    fn report(result: &Value, is_error: bool) -> String {
        assert!(is_error);
        format!("I was not allowed to run that ({}).", result["error"].as_str().unwrap_or_default())
    }

    let model = Arc::new(RuleModel::new(
        ToolCall::new("toolu_sql", "run_sql_query", json!({"query": "DROP TABLE users;"})),
        report,
    ));
    let dispatcher = Dispatcher::new(model, DispatchConfig::default())
        .with_gateway(Arc::new(gateway))
        .unwrap();

    let answer = dispatcher.handle("Delete the users table").await.unwrap();
    assert_eq!(answer.text, "I was not allowed to run that (read_only_violation).");
    assert_eq!(executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_project_wiring_from_config() {
    let mut config = Config::default();
    config.aviation.base_url = mock_opensky().await;
    config.dispatch.max_iterations = 2;

    let model = Arc::new(RuleModel::new(berlin_call(), count_aircraft));
    let dispatcher = Project::Plane.dispatcher(&config, model).await.unwrap();
    assert_eq!(dispatcher.config().max_iterations, 2);

    let answer = dispatcher.handle("Planes over Berlin?").await.unwrap();
    assert!(answer.text.contains("3 aircraft"));
}

#[tokio::test]
async fn test_http_query_end_to_end() {
    let base_url = mock_opensky().await;
    let gateway = AviationGateway::new(base_url, Duration::from_secs(5)).unwrap();
    let dispatcher = Dispatcher::new(
        Arc::new(RuleModel::new(berlin_call(), count_aircraft)),
        DispatchConfig::default(),
    )
    .with_gateway(Arc::new(gateway))
    .unwrap();
    let app = server::router(Arc::new(dispatcher));

    let request = Request::builder()
        .method("POST")
        .uri("/api/query")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"query": "What aircraft are flying over Berlin?"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Map<String, Value> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["answer"], "There are 3 aircraft flying over Berlin right now.");
}
