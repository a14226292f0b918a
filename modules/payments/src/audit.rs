use std::sync::Arc;
use tracing::{Instrument, Span};

use crate::models::AuditEntry;
use crate::store::PaymentStore;

pub const ACTOR_PAYMENT_SERVICE: &str = "payment_service";
pub const ACTOR_PENDING_REQUESTS: &str = "scheduler_service_process_pending_payment_requests";
pub const ACTOR_EXPIRE_PAYMENTS: &str = "scheduler_service_expire_pending_payments";
pub const ACTOR_ORDER_INTAKE: &str = "order_intake_service";

/// Best-effort writer of the audit trail. A failed write is logged and never
/// reaches the caller.
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn PaymentStore>,
    span: Span,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn PaymentStore>, span: Span) -> Self {
        Self { store, span }
    }

    pub async fn record(&self, entry: AuditEntry) {
        let result = self
            .store
            .insert_audit_log(&entry)
            .instrument(self.span.clone())
            .await;

        if let Err(e) = result {
            tracing::warn!(
                parent: &self.span,
                order_id = entry.order_id,
                event = %entry.event,
                actor = %entry.actor,
                error = %e,
                "Failed to write audit log"
            );
        }
    }
}
