//! HTTP surface: health check, protected-resource proxy, issue creation and
//! summarization.
//!
//! Every failure is rendered as `{"status": "error", "message": ...}`; no
//! handler error takes the process down.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::jira::{IssueTracker, NewIssue};
use crate::resource::ResourceClient;
use crate::summarize::Summarizer;

#[derive(Clone)]
pub struct AppState {
    pub resources: ResourceClient,
    pub tracker: Arc<dyn IssueTracker>,
    pub summarizer: Arc<Summarizer>,
    pub resource_url: Option<String>,
}

/// Handler-level error wrapper mapping [`Error`] onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

/// Malformed or incomplete request bodies are caller mistakes.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(Error::Validation(rejection.body_text()))
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Auth(_) | Error::AuthRejected { .. } | Error::ExternalCall(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Io(_) | Error::Json(_) | Error::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self.0 {
            Error::Io(_) | Error::Json(_) | Error::Serialization(_) => {
                error!(error = %self.0, "Internal error while handling request");
                "An internal error occurred".to_string()
            }
            other => {
                warn!(error = %other, "Request failed");
                other.to_string()
            }
        };

        (status, Json(json!({"status": "error", "message": message}))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SummarizeResponse {
    pub summary: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/data", get(fetch_data))
        .route("/api/issues", post(create_issue))
        .route("/api/summarize", post(summarize))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok", "timestamp": Utc::now().to_rfc3339()}))
}

async fn fetch_data(State(state): State<AppState>) -> std::result::Result<Json<Value>, ApiError> {
    let url = state
        .resource_url
        .as_deref()
        .ok_or_else(|| Error::Config("No resource_url configured".to_string()))?;

    let data = state.resources.get_json(url).await?;
    Ok(Json(json!({"status": "success", "data": data})))
}

async fn create_issue(
    State(state): State<AppState>,
    payload: std::result::Result<Json<NewIssue>, JsonRejection>,
) -> std::result::Result<(StatusCode, Json<Value>), ApiError> {
    let Json(issue) = payload?;
    match state.tracker.create_issue(&issue).await? {
        Some(key) => Ok((StatusCode::CREATED, Json(json!({"key": key})))),
        None => Err(Error::ExternalCall("Issue was not created".to_string()).into()),
    }
}

async fn summarize(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SummarizeRequest>, JsonRejection>,
) -> std::result::Result<Json<SummarizeResponse>, ApiError> {
    let Json(request) = payload?;
    let summary = state.summarizer.summarize(&request.text).await?;
    Ok(Json(SummarizeResponse { summary }))
}

/// Serve until ctrl-c.
pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(err) => error!("Unable to listen for shutdown signal: {}", err),
    }
}
