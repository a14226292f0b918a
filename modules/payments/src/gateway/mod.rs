//! External payment gateway: invoice creation and status lookup.

mod xendit;

pub use xendit::{XenditClient, XenditConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invoice status reported by the gateway once the payer has paid.
pub const INVOICE_STATUS_PAID: &str = "PAID";

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-2xx response; `message` is the raw response body.
    #[error("API error (status {status_code}): {message}")]
    Api { status_code: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("no invoice found for external id {0}")]
    InvoiceNotFound(String),
}

impl GatewayError {
    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        matches!(self, GatewayError::Api { status_code, .. } if (400..500).contains(status_code))
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        matches!(self, GatewayError::Api { status_code, .. } if (500..600).contains(status_code))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceRequest {
    pub external_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub description: String,
    pub payer_email: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Invoice {
    pub id: String,
    #[serde(default)]
    pub external_id: String,
    pub status: String,
    #[serde(default)]
    pub invoice_url: String,
    pub expiry_date: DateTime<Utc>,
}

#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError>;

    /// Status of the first invoice the gateway lists for `external_id`.
    async fn check_invoice_status(&self, external_id: &str) -> Result<String, GatewayError>;
}
