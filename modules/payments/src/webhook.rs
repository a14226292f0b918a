//! Gateway webhook validation and reconciliation.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{Instrument, Span};

use crate::error::{PaymentError, PaymentResult};
use crate::metrics::Metrics;
use crate::models::{NewPaymentAnomaly, ANOMALY_INVALID_AMOUNT, EXTERNAL_ID_PREFIX};
use crate::processor::{PaymentProcessor, SuccessOutcome};
use crate::store::PaymentStore;

/// Header carrying the pre-shared callback token.
pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub external_id: String,
    pub status: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// PAID webhook went through the success path
    Paid(SuccessOutcome),
    /// FAILED or PENDING: acknowledged, nothing changes
    Acknowledged,
    /// Unrecognized status, left for manual review
    Ignored,
}

impl WebhookOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Paid(_) => "paid",
            WebhookOutcome::Acknowledged => "acknowledged",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

/// `order-<positive integer>` to the order id. Anything else is rejected
/// rather than defaulted, so a bad reference can never hit another order.
pub fn parse_external_id(external_id: &str) -> PaymentResult<i64> {
    let digits = external_id.strip_prefix(EXTERNAL_ID_PREFIX).ok_or_else(|| {
        PaymentError::Validation(format!(
            "external id '{external_id}' does not start with '{EXTERNAL_ID_PREFIX}'"
        ))
    })?;

    let parsed = if digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse::<i64>().ok()
    } else {
        None
    };

    match parsed {
        Some(order_id) if order_id > 0 => Ok(order_id),
        _ => Err(PaymentError::Validation(format!(
            "external id '{external_id}' does not carry a valid order id"
        ))),
    }
}

/// Constant-time comparison
fn tokens_match(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(provided.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

pub struct WebhookProcessor {
    store: Arc<dyn PaymentStore>,
    processor: Arc<PaymentProcessor>,
    callback_token: String,
    metrics: Metrics,
    span: Span,
}

impl WebhookProcessor {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        processor: Arc<PaymentProcessor>,
        callback_token: impl Into<String>,
        metrics: Metrics,
        span: Span,
    ) -> Self {
        Self {
            store,
            processor,
            callback_token: callback_token.into(),
            metrics,
            span,
        }
    }

    /// Reject a missing or wrong callback token. Runs before the body is parsed.
    pub fn verify_token(&self, provided: Option<&str>) -> PaymentResult<()> {
        let provided = provided.unwrap_or_default();
        if self.callback_token.is_empty()
            || !tokens_match(self.callback_token.as_bytes(), provided.as_bytes())
        {
            self.metrics
                .webhooks_total
                .with_label_values(&["rejected"])
                .inc();
            tracing::warn!(parent: &self.span, "Webhook rejected: invalid callback token");
            return Err(PaymentError::Unauthorized("invalid callback token".to_string()));
        }
        Ok(())
    }

    pub async fn handle(&self, payload: WebhookPayload) -> PaymentResult<WebhookOutcome> {
        let span = tracing::info_span!(
            parent: &self.span,
            "webhook",
            external_id = %payload.external_id,
            status = %payload.status
        );

        let result = self.dispatch(&payload).instrument(span).await;

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        self.metrics.webhooks_total.with_label_values(&[label]).inc();

        result
    }

    async fn dispatch(&self, payload: &WebhookPayload) -> PaymentResult<WebhookOutcome> {
        match payload.status.as_str() {
            "PAID" => {
                let outcome = self.handle_paid(payload).await?;
                Ok(WebhookOutcome::Paid(outcome))
            }
            "FAILED" | "PENDING" => {
                tracing::info!("Webhook acknowledged, no state change");
                Ok(WebhookOutcome::Acknowledged)
            }
            other => {
                tracing::warn!(status = %other, "Unrecognized webhook status, needs manual review");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn handle_paid(&self, payload: &WebhookPayload) -> PaymentResult<SuccessOutcome> {
        let order_id = parse_external_id(&payload.external_id)?;
        let expected = self.store.check_amount_by_order_id(order_id).await?;

        if expected != payload.amount {
            self.record_amount_mismatch(order_id, payload, expected).await;
            return Err(PaymentError::AmountMismatch {
                order_id,
                expected,
                got: payload.amount,
            });
        }

        self.processor.process_payment_success(order_id).await
    }

    async fn record_amount_mismatch(
        &self,
        order_id: i64,
        payload: &WebhookPayload,
        expected: Decimal,
    ) {
        let notes = format!(
            "Webhook amount mismatch: expected {:.2}, got {:.2}",
            expected, payload.amount
        );
        tracing::warn!(order_id, %notes, "Amount mismatch, recording anomaly");

        let anomaly = NewPaymentAnomaly {
            order_id,
            external_id: payload.external_id.clone(),
            anomaly_type: ANOMALY_INVALID_AMOUNT.to_string(),
            notes,
        };
        match self.store.save_anomaly(anomaly).await {
            Ok(()) => self.metrics.payment_anomalies_total.inc(),
            Err(e) => tracing::error!(order_id, error = %e, "Failed to save payment anomaly"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_order_external_ids() {
        assert_eq!(parse_external_id("order-123").unwrap(), 123);
    }

    #[test]
    fn rejects_malformed_external_ids() {
        for bad in ["123", "order-", "order-abc", "order-0", "order--5", "order-+5", "ORDER-12", "order-1x"] {
            assert!(
                matches!(parse_external_id(bad), Err(PaymentError::Validation(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match(b"secret", b"secret"));
        assert!(!tokens_match(b"secret", b"secreT"));
        assert!(!tokens_match(b"secret", b"secret-longer"));
        assert!(!tokens_match(b"secret", b""));
    }

    #[test]
    fn payload_accepts_numeric_amounts() {
        let payload: WebhookPayload =
            serde_json::from_str(r#"{"external_id":"order-1","status":"PAID","amount":10000}"#)
                .unwrap();
        assert_eq!(payload.amount, Decimal::new(10000, 0));
    }
}
