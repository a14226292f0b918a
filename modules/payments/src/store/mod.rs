//! Persistence for payments, payment requests, anomalies, dead letters and
//! the audit trail.
//!
//! All methods are safe to call concurrently from the webhook path and the
//! reconciliation loops. State transitions are conditional updates, so two
//! callers racing on the same order cannot both win.

mod memory;
mod postgres;

pub use memory::InMemoryPaymentStore;
pub use postgres::PgPaymentStore;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::PaymentResult;
use crate::models::{
    AuditEntry, NewFailedEvent, NewPayment, NewPaymentAnomaly, NewPaymentRequest, Payment,
    PaymentRequest,
};

/// Batch size of the pending-request and requeue loops.
pub const DEFAULT_BATCH_SIZE: i64 = 5;

/// FAILED requests with a retry count above this stay FAILED.
pub const MAX_REQUEST_RETRY: i32 = 3;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a PENDING payment. A second payment for the same order is a
    /// `Conflict`.
    async fn save_payment(&self, payment: NewPayment) -> PaymentResult<Payment>;

    /// PENDING/EXPIRED -> PAID. Returns false when the payment was already
    /// PAID or does not exist.
    async fn mark_paid(&self, order_id: i64) -> PaymentResult<bool>;

    /// `NotFound` for an unknown order.
    async fn is_already_paid(&self, order_id: i64) -> PaymentResult<bool>;

    /// `NotFound` for an unknown order.
    async fn check_amount_by_order_id(&self, order_id: i64) -> PaymentResult<Decimal>;

    async fn get_payment_by_order_id(&self, order_id: i64) -> PaymentResult<Option<Payment>>;

    /// PENDING payments whose expiry has passed.
    async fn get_expired_pending_payments(&self) -> PaymentResult<Vec<Payment>>;

    /// PENDING -> EXPIRED. Returns false if the payment left PENDING meanwhile.
    async fn mark_expired(&self, payment_id: i64) -> PaymentResult<bool>;

    /// PENDING payments created within the last 24 hours.
    async fn get_pending_invoices(&self) -> PaymentResult<Vec<Payment>>;

    async fn save_payment_request(&self, request: NewPaymentRequest)
        -> PaymentResult<PaymentRequest>;

    /// Oldest PENDING requests first.
    async fn get_pending_payment_requests(&self, limit: i64) -> PaymentResult<Vec<PaymentRequest>>;

    /// Oldest FAILED requests with `retry_count <= max_retry` first.
    async fn get_failed_payment_requests(
        &self,
        limit: i64,
        max_retry: i32,
    ) -> PaymentResult<Vec<PaymentRequest>>;

    async fn update_success_payment_request(&self, id: i64) -> PaymentResult<()>;

    /// Mark FAILED with a note and bump `retry_count`.
    async fn update_failed_payment_request(&self, id: i64, notes: &str) -> PaymentResult<()>;

    /// Put a FAILED request back to PENDING.
    async fn update_pending_payment_request(&self, id: i64) -> PaymentResult<()>;

    async fn save_anomaly(&self, anomaly: NewPaymentAnomaly) -> PaymentResult<()>;

    async fn save_failed_event(&self, event: NewFailedEvent) -> PaymentResult<()>;

    async fn insert_audit_log(&self, entry: &AuditEntry) -> PaymentResult<()>;
}
