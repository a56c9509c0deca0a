//! HTTP surface (C11): health, webhook sink, preview listing/deletion,
//! and the OpenAPI document. Router composition and middleware layering
//! follow rivetr's `api::create_router` pattern, trimmed to the routes
//! this daemon actually exposes.

mod openapi;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Html,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::webhook::PullRequestEvent;
use crate::AppState;

const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook/github", post(github_webhook))
        .route("/api/previews", get(list_previews))
        .route("/api/previews/:deployment_id", delete(delete_preview))
        .route("/openapi.json", get(openapi_json))
        .route("/api-docs", get(api_docs))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    uptime: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now(),
        uptime: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
struct WebhookOk {
    status: &'static str,
}

async fn github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOk>, ApiError> {
    let start = Instant::now();
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !crate::webhook::verify_signature(&body, signature, &state.config.github_webhook_secret) {
        warn!(latency_ms = start.elapsed().as_millis(), "rejected webhook with invalid signature");
        return Err(ApiError::unauthorized("Invalid signature"));
    }

    let event: PullRequestEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid webhook payload: {e}")))?;

    let action = event.action.clone();
    let repo = event.repository.full_name.clone();
    let pr_number = event.pull_request.number;

    state.webhook_handler.handle(event).await?;

    info!(
        repo = %repo,
        pr = pr_number,
        action = %action,
        latency_ms = start.elapsed().as_millis(),
        "webhook handled"
    );
    Ok(Json(WebhookOk { status: "ok" }))
}

#[derive(Serialize)]
struct ListPreviewsResponse {
    deployments: Vec<crate::model::Deployment>,
}

async fn list_previews(State(state): State<Arc<AppState>>) -> Json<ListPreviewsResponse> {
    let deployments = state.tracker.get_all_deployments().await;
    Json(ListPreviewsResponse { deployments })
}

async fn delete_preview(
    State(state): State<Arc<AppState>>,
    Path(deployment_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if deployment_id.trim().is_empty() {
        return Err(ApiError::bad_request("missing deployment id"));
    }

    let Some(deployment) = state.tracker.get_deployment(&deployment_id).await else {
        return Err(ApiError::not_found(format!("unknown deployment id {deployment_id}")));
    };

    let guard = state.locks.lock_for(&deployment_id);
    let _permit = guard.lock().await;

    state.container.cleanup_preview(&deployment_id).await?;
    state
        .proxy
        .remove_preview(&deployment.project_slug, deployment.pr_number)
        .await?;
    state.tracker.delete_deployment(&deployment_id).await?;

    info!(deployment_id = %deployment_id, "preview deleted via API");
    Ok(StatusCode::OK)
}

async fn openapi_json() -> Json<serde_json::Value> {
    Json(openapi::document())
}

async fn api_docs() -> Html<&'static str> {
    Html(openapi::SWAGGER_HTML)
}
