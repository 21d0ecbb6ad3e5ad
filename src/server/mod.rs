//! HTTP shell
//!
//! - `GET /health` - liveness
//! - `POST /api/query` - `{"query": "..."}` in, `{"answer": "..."}` out

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::dispatch::{DispatchError, Dispatcher};
use crate::llm::LlmClient;

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Errors the HTTP shell can answer with
#[derive(Debug)]
pub enum ServerError {
    BadRequest(String),
    Dispatch(DispatchError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ServerError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "Bad Request".to_string(),
                    message,
                },
            ),
            ServerError::Dispatch(e) => {
                log::error!("Query failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "Internal Server Error".to_string(),
                        message: "An unexpected error occurred".to_string(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

pub fn router<L: LlmClient + 'static>(dispatcher: Arc<Dispatcher<L>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/query", post(query::<L>))
        .with_state(dispatcher)
}

/// Bind and serve until the process is stopped
pub async fn serve<L: LlmClient + 'static>(dispatcher: Arc<Dispatcher<L>>, host: &str, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    log::info!("HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(dispatcher)).await
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn query<L: LlmClient + 'static>(
    State(dispatcher): State<Arc<Dispatcher<L>>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ServerError> {
    let Json(request) = payload.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let query = request
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ServerError::BadRequest("Query cannot be empty".to_string()))?;

    log::info!("Received query: {}", query);
    let answer = dispatcher.handle(query).await.map_err(ServerError::Dispatch)?;
    Ok(Json(QueryResponse { answer: answer.text }))
}
