//! HTTP API (Piston v2 compatible)

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::context::AppContext;
use crate::error::ExecutionError;
use crate::models::{ErrorBody, ExecutionRequest, ExecutionResult, RuntimeInfo};

/// Error returned by a handler, rendered as `{"message": ...}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        if err.is_client_error() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal(message) => {
                error!("Request failed: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v2/runtimes", get(list_runtimes))
        .route("/api/v2/runtimes/{language}", get(get_runtime))
        .route("/api/v2/execute", post(execute))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_runtimes(State(ctx): State<Arc<AppContext>>) -> Json<Vec<RuntimeInfo>> {
    Json(ctx.available_runtimes().await)
}

async fn get_runtime(
    State(ctx): State<Arc<AppContext>>,
    Path(language): Path<String>,
) -> Result<Json<RuntimeInfo>, ApiError> {
    ctx.registry()
        .lookup(&language)
        .map(|rt| Json(RuntimeInfo::from(rt)))
        .ok_or_else(|| ApiError::NotFound(format!("Language not found: {}", language)))
}

async fn execute(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<ExecutionRequest>, JsonRejection>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let result = ctx.executor().execute(request).await?;
    Ok(Json(result))
}
