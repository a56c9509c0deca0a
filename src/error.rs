//! Typed orchestrator errors and their HTTP mapping.
//!
//! Internal plumbing (git, filesystem, the container engine) propagates
//! `anyhow::Result` with `.context(...)`; anywhere the webhook handler or
//! the HTTP surface needs to branch on *what kind* of failure occurred,
//! it does so through [`OrchestratorError`] instead of string matching.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Error kinds a deploy/update/cleanup run can fail with.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("preview-config.yml not found in cloned repo")]
    ConfigMissing,

    #[error("preview-config.yml is invalid: {0}")]
    ConfigInvalid(String),

    #[error("repository {0} is not on the allow-list")]
    AllowlistRejected(String),

    #[error("webhook signature verification failed")]
    SignatureInvalid,

    #[error("port pool exhausted")]
    PortsExhausted,

    #[error("build command #{index} failed: {command}")]
    BuildCommandFailed { index: usize, command: String },

    #[error("compose up failed: {0}")]
    ContainerUp(String),

    #[error("health check timed out after {attempts} attempts")]
    HealthCheckTimeout { attempts: u32 },

    #[error("proxy reload failed: {0}")]
    ProxyReload(String),

    #[error("source-forge API call failed: {0}")]
    ForgeApiFailure(String),

    #[error("deployment tracker I/O error: {0}")]
    TrackerIo(#[from] std::io::Error),

    #[error("unknown deployment id {0}")]
    UnknownDeployment(String),
}

impl OrchestratorError {
    /// Whether this failure happened in a best-effort (non-critical) path.
    /// Best-effort failures are logged and must never abort the primary
    /// deploy/update/cleanup operation.
    pub fn is_best_effort(&self) -> bool {
        matches!(self, OrchestratorError::ForgeApiFailure(_))
    }
}

/// Machine-readable error body returned by the HTTP surface.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Thin API error wrapper: an HTTP status plus a message, matching the
/// `{error: <msg>}` shape the inbound HTTP interface specifies.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::SignatureInvalid => {
                ApiError::unauthorized("Invalid signature")
            }
            OrchestratorError::UnknownDeployment(id) => {
                ApiError::not_found(format!("unknown deployment id {id}"))
            }
            OrchestratorError::AllowlistRejected(repo) => {
                ApiError::internal(format!("repository {repo} is not on the allow-list"))
            }
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(err.to_string())
    }
}
