//! Reliable publication of payment-success events.
//!
//! A publish cycle is up to three attempts, each preceded by a
//! `PublishPaymentSuccess` audit entry and followed on failure by a 1 s, 2 s
//! and 4 s backoff. When every attempt fails the event is dead-lettered into
//! `failed_events` and the caller gets [`PaymentError::PublishExhausted`];
//! the payment must then stay unpaid.

use event_bus::retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusError, EventBus};
use std::sync::Arc;
use tracing::{Instrument, Span};

use crate::audit::{AuditTrail, ACTOR_PAYMENT_SERVICE};
use crate::error::{PaymentError, PaymentResult};
use crate::metrics::Metrics;
use crate::models::{
    external_id_for, AuditEntry, AuditEvent, NewFailedEvent, PaymentSuccessEvent,
    FAILED_TYPE_PUBLISH_PAYMENT_SUCCESS,
};
use crate::store::PaymentStore;

pub const DEFAULT_PAYMENT_SUCCESS_SUBJECT: &str = "payment.success";

/// 3 attempts, 1 s doubling backoff, including after the last failure.
pub fn publish_retry_config() -> RetryConfig {
    RetryConfig {
        backoff_after_final_attempt: true,
        ..RetryConfig::default()
    }
}

pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    store: Arc<dyn PaymentStore>,
    audit: AuditTrail,
    metrics: Metrics,
    subject: String,
    retry: RetryConfig,
    span: Span,
}

impl EventPublisher {
    pub fn new(
        bus: Arc<dyn EventBus>,
        store: Arc<dyn PaymentStore>,
        audit: AuditTrail,
        metrics: Metrics,
        span: Span,
    ) -> Self {
        Self {
            bus,
            store,
            audit,
            metrics,
            subject: DEFAULT_PAYMENT_SUCCESS_SUBJECT.to_string(),
            retry: publish_retry_config(),
            span,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Single attempt: `{"order_id":..,"status":"paid"}` keyed by `order-<id>`.
    pub async fn publish_payment_success(&self, order_id: i64) -> Result<(), BusError> {
        let payload = serde_json::to_vec(&PaymentSuccessEvent::paid(order_id))
            .map_err(|e| BusError::SerializationError(e.to_string()))?;

        self.bus
            .publish_keyed(&self.subject, &external_id_for(order_id), payload)
            .await
    }

    /// Publish with bounded retry; dead-letter on exhaustion.
    pub async fn publish_payment_success_reliably(&self, order_id: i64) -> PaymentResult<()> {
        let result = retry_with_backoff(
            |attempt| async move {
                self.audit
                    .record(AuditEntry::new(
                        order_id,
                        AuditEvent::PublishPaymentSuccess,
                        ACTOR_PAYMENT_SERVICE,
                    ))
                    .await;

                let outcome = self.publish_payment_success(order_id).await;
                let label = if outcome.is_ok() { "ok" } else { "error" };
                self.metrics
                    .publish_attempts_total
                    .with_label_values(&[label])
                    .inc();
                if outcome.is_ok() {
                    tracing::info!(order_id, attempt, subject = %self.subject, "Payment success published");
                }
                outcome
            },
            &self.retry,
            "publish_payment_success",
        )
        .instrument(self.span.clone())
        .await;

        let last_error = match result {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let attempts = self.retry.max_attempts.max(1);
        let dead_letter = NewFailedEvent {
            order_id,
            external_id: external_id_for(order_id),
            failed_type: FAILED_TYPE_PUBLISH_PAYMENT_SUCCESS.to_string(),
            notes: last_error.to_string(),
        };

        if let Err(store_err) = self.store.save_failed_event(dead_letter).await {
            tracing::error!(
                parent: &self.span,
                order_id,
                publish_error = %last_error,
                error = %store_err,
                "CRITICAL: Failed to dead-letter payment success - event may be lost!"
            );
            return Err(store_err);
        }

        self.metrics.dead_letters_total.inc();
        tracing::error!(
            parent: &self.span,
            order_id,
            attempts,
            error = %last_error,
            "Payment success event moved to failed_events after retries"
        );

        Err(PaymentError::PublishExhausted {
            order_id,
            attempts,
            last_error: last_error.to_string(),
        })
    }
}
