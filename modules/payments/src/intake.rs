use std::sync::Arc;
use tracing::{Instrument, Span};

use crate::audit::{AuditTrail, ACTOR_ORDER_INTAKE};
use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{GatewayClient, InvoiceRequest};
use crate::metrics::Metrics;
use crate::models::{
    external_id_for, AuditEntry, AuditEvent, NewPayment, NewPaymentRequest, OrderCreatedEvent,
};
use crate::scheduler::invoice_description;
use crate::store::PaymentStore;
use crate::users::UserDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Gateway invoice created and PENDING payment stored
    InvoiceCreated,
    /// A payment for the order already existed
    AlreadyHandled,
    /// Queued as a payment request for the scheduler
    Deferred,
}

/// Reacts to order-created events, either creating the gateway invoice
/// right away or deferring it to the pending-request loop.
pub struct OrderIntake {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn GatewayClient>,
    users: Arc<dyn UserDirectory>,
    audit: AuditTrail,
    metrics: Metrics,
    defer_invoice_creation: bool,
    span: Span,
}

impl OrderIntake {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn GatewayClient>,
        users: Arc<dyn UserDirectory>,
        audit: AuditTrail,
        metrics: Metrics,
        defer_invoice_creation: bool,
        span: Span,
    ) -> Self {
        Self {
            store,
            gateway,
            users,
            audit,
            metrics,
            defer_invoice_creation,
            span,
        }
    }

    pub async fn handle_order_created(&self, event: OrderCreatedEvent) -> PaymentResult<IntakeOutcome> {
        let span = tracing::info_span!(
            parent: &self.span,
            "order_created",
            order_id = event.order_id,
            user_id = event.user_id
        );

        async {
            if event.order_id <= 0 {
                return Err(PaymentError::Validation(format!(
                    "order id must be positive, got {}",
                    event.order_id
                )));
            }

            if self.defer_invoice_creation {
                self.store
                    .save_payment_request(NewPaymentRequest {
                        order_id: event.order_id,
                        user_id: event.user_id,
                        amount: event.amount,
                    })
                    .await?;
                tracing::info!("Payment request queued");
                return Ok(IntakeOutcome::Deferred);
            }

            self.create_invoice_directly(&event).await
        }
        .instrument(span)
        .await
    }

    async fn create_invoice_directly(&self, event: &OrderCreatedEvent) -> PaymentResult<IntakeOutcome> {
        let payer_email = self.users.get_user_email(event.user_id).await?;
        let external_id = external_id_for(event.order_id);

        let result = self
            .gateway
            .create_invoice(&InvoiceRequest {
                external_id: external_id.clone(),
                amount: event.amount,
                description: invoice_description(event.order_id),
                payer_email,
            })
            .await;

        self.audit
            .record(
                AuditEntry::new(event.order_id, AuditEvent::CreateInvoice, ACTOR_ORDER_INTAKE)
                    .with_user(event.user_id)
                    .with_external_id(external_id.clone()),
            )
            .await;

        let invoice = match result {
            Ok(invoice) => {
                self.record_invoice("ok");
                invoice
            }
            Err(e) => {
                self.record_invoice("error");
                return Err(e.into());
            }
        };

        let saved = self
            .store
            .save_payment(NewPayment {
                order_id: event.order_id,
                user_id: event.user_id,
                external_id,
                amount: event.amount,
                expired_time: invoice.expiry_date,
            })
            .await;

        match saved {
            Ok(payment) => {
                tracing::info!(
                    payment_id = payment.id,
                    invoice_id = %invoice.id,
                    invoice_url = %invoice.invoice_url,
                    "Invoice created for order"
                );
                Ok(IntakeOutcome::InvoiceCreated)
            }
            Err(PaymentError::Conflict(_)) => {
                tracing::info!("Payment already exists for order, treating as handled");
                Ok(IntakeOutcome::AlreadyHandled)
            }
            Err(e) => Err(e),
        }
    }

    fn record_invoice(&self, result: &str) {
        self.metrics
            .invoices_created_total
            .with_label_values(&["intake", result])
            .inc();
    }
}
