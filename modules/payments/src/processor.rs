use std::sync::Arc;
use tracing::{Instrument, Span};

use crate::audit::{AuditTrail, ACTOR_PAYMENT_SERVICE};
use crate::error::PaymentResult;
use crate::metrics::Metrics;
use crate::models::{AuditEntry, AuditEvent};
use crate::publisher::EventPublisher;
use crate::store::PaymentStore;

/// What happened to a payment on the success path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessOutcome {
    /// Published and transitioned to PAID by this call
    MarkedPaid,
    /// Already PAID before this call; nothing published
    AlreadyPaid,
    /// Published, but a concurrent caller won the PAID transition
    LostRace,
}

/// The shared payment-success path used by webhooks and the invoice poller.
///
/// Ordering is strict: publish first, then the conditional PAID update, so a
/// payment is never PAID without a published (or dead-lettered) event.
pub struct PaymentProcessor {
    store: Arc<dyn PaymentStore>,
    publisher: Arc<EventPublisher>,
    audit: AuditTrail,
    metrics: Metrics,
    span: Span,
}

impl PaymentProcessor {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        publisher: Arc<EventPublisher>,
        audit: AuditTrail,
        metrics: Metrics,
        span: Span,
    ) -> Self {
        Self {
            store,
            publisher,
            audit,
            metrics,
            span,
        }
    }

    pub async fn process_payment_success(&self, order_id: i64) -> PaymentResult<SuccessOutcome> {
        async {
            if self.store.is_already_paid(order_id).await? {
                tracing::info!(order_id, "Payment already marked as paid, skipping");
                return Ok(SuccessOutcome::AlreadyPaid);
            }

            self.publisher
                .publish_payment_success_reliably(order_id)
                .await?;

            if !self.store.mark_paid(order_id).await? {
                tracing::info!(order_id, "Payment was marked paid concurrently");
                return Ok(SuccessOutcome::LostRace);
            }

            self.metrics.payments_marked_paid_total.inc();
            self.audit
                .record(AuditEntry::new(
                    order_id,
                    AuditEvent::MarkPaid,
                    ACTOR_PAYMENT_SERVICE,
                ))
                .await;

            tracing::info!(order_id, "Payment marked as paid");
            Ok(SuccessOutcome::MarkedPaid)
        }
        .instrument(self.span.clone())
        .await
    }
}
