use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of the gateway reference derived from an order id.
pub const EXTERNAL_ID_PREFIX: &str = "order-";

pub const ANOMALY_INVALID_AMOUNT: &str = "invalid_amount";
pub const ANOMALY_STATUS_NEED_TO_CHECK: &str = "NEED_TO_CHECK";

pub const FAILED_TYPE_PUBLISH_PAYMENT_SUCCESS: &str = "publish_payment_success";
pub const FAILED_EVENT_STATUS_NEEDS_REVIEW: &str = "NEEDS_REVIEW";

/// `order-<id>`: the gateway external id and the bus partition key of an order.
pub fn external_id_for(order_id: i64) -> String {
    format!("{EXTERNAL_ID_PREFIX}{order_id}")
}

// ============================================================================
// PAYMENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Expired => "EXPIRED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PaymentStatus::Pending),
            "PAID" => Some(PaymentStatus::Paid),
            "EXPIRED" => Some(PaymentStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One payable invoice per order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub external_id: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub expired_time: DateTime<Utc>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// Insert form of [`Payment`]; new payments always start PENDING.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: i64,
    pub user_id: i64,
    pub external_id: String,
    pub amount: Decimal,
    pub expired_time: DateTime<Utc>,
}

// ============================================================================
// PAYMENT REQUESTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentRequestStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRequestStatus::Pending => "PENDING",
            PaymentRequestStatus::Success => "SUCCESS",
            PaymentRequestStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PaymentRequestStatus::Pending),
            "SUCCESS" => Some(PaymentRequestStatus::Success),
            "FAILED" => Some(PaymentRequestStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deferred "please create an invoice" intent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRequest {
    pub id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub amount: Decimal,
    pub status: PaymentRequestStatus,
    pub retry_count: i32,
    pub notes: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentRequest {
    pub order_id: i64,
    pub user_id: i64,
    pub amount: Decimal,
}

// ============================================================================
// ANOMALIES, DEAD LETTERS, AUDIT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentAnomaly {
    pub id: i64,
    pub order_id: i64,
    pub external_id: String,
    pub anomaly_type: String,
    pub notes: String,
    pub status: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentAnomaly {
    pub order_id: i64,
    pub external_id: String,
    pub anomaly_type: String,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedEvent {
    pub id: i64,
    pub order_id: i64,
    pub external_id: String,
    pub failed_type: String,
    pub status: String,
    pub notes: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFailedEvent {
    pub order_id: i64,
    pub external_id: String,
    pub failed_type: String,
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    PublishPaymentSuccess,
    MarkPaid,
    CreateInvoice,
    MarkExpired,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::PublishPaymentSuccess => "PublishPaymentSuccess",
            AuditEvent::MarkPaid => "MarkPaid",
            AuditEvent::CreateInvoice => "CreateInvoice",
            AuditEvent::MarkExpired => "MarkExpired",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit record about to be written. Fields that are unknown at the call
/// site stay zero / empty.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub order_id: i64,
    pub user_id: i64,
    pub payment_id: i64,
    pub external_id: String,
    pub event: AuditEvent,
    pub actor: String,
}

impl AuditEntry {
    pub fn new(order_id: i64, event: AuditEvent, actor: impl Into<String>) -> Self {
        Self {
            order_id,
            user_id: 0,
            payment_id: 0,
            external_id: String::new(),
            event,
            actor: actor.into(),
        }
    }

    /// Copy user, payment and external ids from a stored payment.
    pub fn for_payment(mut self, payment: &Payment) -> Self {
        self.user_id = payment.user_id;
        self.payment_id = payment.id;
        self.external_id = payment.external_id.clone();
        self
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = external_id.into();
        self
    }
}

/// A persisted audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentAuditLog {
    pub id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub payment_id: i64,
    pub external_id: String,
    pub event: String,
    pub actor: String,
    pub create_time: DateTime<Utc>,
}

// ============================================================================
// BUS PAYLOADS
// ============================================================================

/// Payload of the order-created event consumed by intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_id: i64,
    pub user_id: i64,
    pub amount: Decimal,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub shipping_address: String,
}

/// Payload of the payment-success event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSuccessEvent {
    pub order_id: i64,
    pub status: String,
}

impl PaymentSuccessEvent {
    pub fn paid(order_id: i64) -> Self {
        Self {
            order_id,
            status: "paid".to_string(),
        }
    }
}
