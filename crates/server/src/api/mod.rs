use crate::config::{AppState, ServerConfig};
use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use simmer_core::EngineError;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod handlers;

/// Start the API server
pub async fn serve(addr: &str, config: ServerConfig) -> Result<()> {
    let state = AppState::new(&config);

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the API router
fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/recipes/execute", post(handlers::execute_recipe))
        .route("/processes/{job_id}/callback", post(handlers::job_callback))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "simmer",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Custom error type for API handlers. Substitution and document-shape
/// errors are the caller's fault; recipe fetch failures point upstream;
/// everything else surfaces as an internal error.
pub enum ApiError {
    BadRequest(ErrorResponse),
    Upstream(ErrorResponse),
    Engine(EngineError),
}

impl ApiError {
    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::BadRequest(ErrorResponse::new(error))
    }

    pub fn upstream(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Upstream(ErrorResponse::with_details(error, details))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, response) = match self {
            ApiError::BadRequest(response) => (StatusCode::BAD_REQUEST, response),
            ApiError::Upstream(response) => (StatusCode::BAD_GATEWAY, response),
            ApiError::Engine(err) => {
                let status = match &err {
                    EngineError::VariableNotFound { .. }
                    | EngineError::InvalidReference(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, ErrorResponse::new(err.to_string()))
            }
        };

        (status, Json(response)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
