use axum::Json;
use axum::extract::FromRequest;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Every failure a handler can report. Expected failures carry the message
/// shown to the client; anything unexpected is wrapped as `Internal` and
/// only described in the log.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Capacity(String),

    #[error("{0}")]
    AlreadyScanned(String),

    #[error("{0}")]
    Payment(String),

    #[error("{0}")]
    PaymentNotComplete(String),

    #[error("{0}")]
    InvalidSignature(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::Capacity(_)
            | Self::AlreadyScanned(_)
            | Self::Payment(_)
            | Self::PaymentNotComplete(_)
            | Self::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Capacity(_) => "SOLD_OUT",
            Self::AlreadyScanned(_) => "ALREADY_SCANNED",
            Self::Payment(_) => "PAYMENT_ERROR",
            Self::PaymentNotComplete(_) => "PAYMENT_NOT_COMPLETE",
            Self::InvalidSignature(_) => "INVALID_SIGNATURE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{} not found", what))
    }

    pub fn forbidden() -> Self {
        Self::Forbidden("Access denied".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            Self::Internal(e) => error!("Internal error: {:#}", e),
            Self::Payment(msg) => warn!("Payment error: {}", msg),
            _ => {}
        }

        let body = json!({
            "message": self.to_string(),
            "error": self.code(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(anyhow::anyhow!("Blocking task failed: {}", e))
    }
}

/// `Json` that reports malformed bodies through the error envelope instead
/// of axum's plain-text rejection.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
