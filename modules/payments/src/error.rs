use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use event_bus::BusError;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::users::UserLookupError;

/// Error taxonomy of the payment core.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Missing or wrong webhook callback token
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate creation; callers treat it as "already handled"
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("amount mismatch for order {order_id}: expected {expected:.2}, got {got:.2}")]
    AmountMismatch {
        order_id: i64,
        expected: Decimal,
        got: Decimal,
    },

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("user lookup failed: {0}")]
    UserLookup(#[from] UserLookupError),

    #[error("publishing payment success for order {order_id} failed after {attempts} attempts: {last_error}")]
    PublishExhausted {
        order_id: i64,
        attempts: u32,
        last_error: String,
    },

    #[error("event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("render error: {0}")]
    Render(String),
}

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl PaymentError {
    /// Short machine-readable code, also used as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Unauthorized(_) => "unauthorized",
            PaymentError::Validation(_) => "validation_error",
            PaymentError::NotFound(_) => "not_found",
            PaymentError::Conflict(_) => "conflict",
            PaymentError::AmountMismatch { .. } => "amount_mismatch",
            PaymentError::Gateway(_) => "gateway_error",
            PaymentError::UserLookup(_) => "user_lookup_error",
            PaymentError::PublishExhausted { .. } => "publish_exhausted",
            PaymentError::Bus(_) => "bus_error",
            PaymentError::Database(_) => "database_error",
            PaymentError::Render(_) => "render_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PaymentError::Validation(_) => StatusCode::BAD_REQUEST,
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::Conflict(_) => StatusCode::CONFLICT,
            PaymentError::AmountMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PaymentError::Gateway(_) | PaymentError::UserLookup(_) => StatusCode::BAD_GATEWAY,
            PaymentError::PublishExhausted { .. } | PaymentError::Bus(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PaymentError::Database(_) | PaymentError::Render(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // internals stay in the logs
        let message = match &self {
            PaymentError::Database(_) => "internal storage error".to_string(),
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.code().to_string(),
                message,
            }),
        )
            .into_response()
    }
}
