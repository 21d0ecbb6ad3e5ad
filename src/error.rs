//! Error types for skychat
//!
//! Each layer has its own thiserror enum; `SkychatError` gathers them for the
//! library surface.

use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::gateway::GatewayError;
use crate::llm::LlmError;
use crate::tools::RegistryError;

#[derive(Debug, Error)]
pub enum SkychatError {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for skychat operations
pub type Result<T> = std::result::Result<T, SkychatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error() {
        let err = SkychatError::Config("OPENWEATHER_API_KEY is not set".to_string());
        assert_eq!(err.to_string(), "Configuration error: OPENWEATHER_API_KEY is not set");
    }

    #[test]
    fn test_gateway_error_conversion() {
        let err: SkychatError = GatewayError::QueryExecution("connection refused".into()).into();
        assert!(matches!(err, SkychatError::Gateway(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_dispatch_error_conversion() {
        let err: SkychatError = DispatchError::IterationLimitExceeded { limit: 6 }.into();
        assert_eq!(err.to_string(), "Dispatch error: No final answer after 6 model calls");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SkychatError = io_err.into();
        assert!(matches!(err, SkychatError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: SkychatError = json_err.into();
        assert!(matches!(err, SkychatError::Json(_)));
    }
}
