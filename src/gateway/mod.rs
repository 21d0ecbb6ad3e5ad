//! External data gateways
//!
//! A gateway owns the tools it declares and performs exactly one outbound
//! call per invocation. Results come back as a normalized [`ToolPayload`]
//! or a typed [`GatewayError`]; nothing is kept between calls.

pub mod aviation;
pub mod database;
pub mod sql_guard;
pub mod weather;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::tools::ToolSpec;

pub use aviation::{AircraftState, AviationGateway, BoundingBox};
pub use database::{DatabaseGateway, PostgresExecutor, PostgresSettings, QueryExecutor, RowSet, SchemaInfo};
pub use weather::{WeatherGateway, WeatherReading};

/// Failures reported by a gateway. None of these end a dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    #[error("Statement rejected, only read-only queries are allowed: {0}")]
    ReadOnlyViolation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),
}

/// The request URL is dropped, it can carry credentials in its query string
impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Upstream(e.without_url().to_string())
    }
}

/// Normalized success data handed back to the model
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    Aircraft(Vec<AircraftState>),
    Weather(WeatherReading),
    Rows(RowSet),
}

impl ToolPayload {
    /// JSON shape sent to the model as tool_result content
    pub fn to_model_json(&self) -> Value {
        match self {
            ToolPayload::Aircraft(list) => json!({
                "aircraft_count": list.len(),
                "aircraft": list.iter().map(AircraftState::to_model_json).collect::<Vec<_>>(),
            }),
            ToolPayload::Weather(reading) => reading.to_model_json(),
            ToolPayload::Rows(rows) => rows.to_model_json(),
        }
    }

    /// Short description for logs
    pub fn summary(&self) -> String {
        match self {
            ToolPayload::Aircraft(list) => format!("{} aircraft", list.len()),
            ToolPayload::Weather(reading) => format!("weather for {}, {}", reading.city, reading.country),
            ToolPayload::Rows(rows) => format!("{} row(s)", rows.rows.len()),
        }
    }
}

/// A source of external data the model can reach through tool calls
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Gateway name for logs
    fn name(&self) -> &'static str;

    /// Tool specs this gateway serves
    fn tools(&self) -> Vec<ToolSpec>;

    /// Run one tool call whose arguments already passed validation
    async fn invoke(&self, tool_name: &str, args: &Map<String, Value>) -> Result<ToolPayload, GatewayError>;
}

pub(crate) fn number_arg(args: &Map<String, Value>, name: &str) -> Result<f64, GatewayError> {
    args.get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| GatewayError::InvalidArgument(format!("'{}' must be a number", name)))
}

pub(crate) fn string_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str, GatewayError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidArgument(format!("'{}' must be a string", name)))
}

pub(crate) fn optional_string_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

pub(crate) fn unsupported_tool(gateway: &str, tool_name: &str) -> GatewayError {
    GatewayError::InvalidArgument(format!("{} gateway does not serve tool '{}'", gateway, tool_name))
}
