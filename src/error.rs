//! Error types for the analysis pipeline and the HTTP surface.
//!
//! Pipeline errors are layered: the gateway reports what went wrong talking to
//! the model service, passes wrap that with the pass name, and the analyzer
//! only ever fails a whole document when no payload could be prepared.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures talking to the vision-model service.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Model service request failed: {0}")]
    Transport(String),

    #[error("Model service error: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("No response text from model service")]
    EmptyResponse,

    #[error("File processing did not finish after {attempts} status checks")]
    ProcessingTimeout { attempts: u32 },

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Invalid model service response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Which analysis pass produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Legend,
    Grid,
    Validation,
    Quick,
    Specification,
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassKind::Legend => write!(f, "legend"),
            PassKind::Grid => write!(f, "grid count"),
            PassKind::Validation => write!(f, "validation"),
            PassKind::Quick => write!(f, "quick count"),
            PassKind::Specification => write!(f, "specification"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{pass} pass failed: {source}")]
pub struct PassError {
    pub pass: PassKind,
    #[source]
    pub source: GatewayError,
}

impl PassError {
    pub fn new(pass: PassKind, source: GatewayError) -> Self {
        Self { pass, source }
    }
}

/// Document-level failure. Everything else degrades inside the pipeline.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{0}")]
    Prepare(#[from] GatewayError),

    #[error("{0}")]
    Pass(#[from] PassError),

    #[error("analysis cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream model service error: {0}")]
    Upstream(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::NotFound(msg) | Self::BadRequest(msg) | Self::Upstream(msg) => msg.clone(),
            // Don't leak internal error details
            Self::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::Cancelled => Self::BadRequest(e.to_string()),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self::Upstream(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(e) => {
                tracing::error!(error = ?e, "Internal server error");
            }
            _ => {
                tracing::warn!(error = %self, "API error");
            }
        }

        let status = self.status_code();
        let body = ErrorResponse {
            code: self.error_code().to_string(),
            message: self.public_message(),
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
