//! Background reconciliation loops.
//!
//! Four independent tasks keep local payment state convergent with the
//! gateway. They share nothing but the store. Each loop keeps going on
//! errors: a failed batch fetch pauses for the error backoff, a failed row is
//! logged and skipped. Only the shutdown signal ends a loop.
//!
//! | loop            | cadence        | on fetch error |
//! |-----------------|----------------|----------------|
//! | expire          | 10 min         | 10 s           |
//! | pending request | 5 s            | 10 s           |
//! | failed requeue  | 1 min          | 10 s           |
//! | invoice poll    | 10 min ticker  | next tick      |

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, Span};

use crate::audit::{AuditTrail, ACTOR_EXPIRE_PAYMENTS, ACTOR_PENDING_REQUESTS};
use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{GatewayClient, InvoiceRequest, INVOICE_STATUS_PAID};
use crate::metrics::Metrics;
use crate::models::{external_id_for, AuditEntry, AuditEvent, NewPayment, PaymentRequest};
use crate::processor::PaymentProcessor;
use crate::store::{PaymentStore, DEFAULT_BATCH_SIZE, MAX_REQUEST_RETRY};
use crate::users::UserDirectory;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub expire_interval: Duration,
    pub pending_request_interval: Duration,
    pub failed_request_interval: Duration,
    pub invoice_poll_interval: Duration,
    pub error_backoff: Duration,
    pub batch_size: i64,
    pub max_request_retry: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            expire_interval: Duration::from_secs(10 * 60),
            pending_request_interval: Duration::from_secs(5),
            failed_request_interval: Duration::from_secs(60),
            invoice_poll_interval: Duration::from_secs(10 * 60),
            error_backoff: Duration::from_secs(10),
            batch_size: DEFAULT_BATCH_SIZE,
            max_request_retry: MAX_REQUEST_RETRY,
        }
    }
}

/// Invoice description sent to the gateway for an order.
pub fn invoice_description(order_id: i64) -> String {
    format!("Payment for Order {order_id}")
}

pub struct ReconciliationScheduler {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn GatewayClient>,
    users: Arc<dyn UserDirectory>,
    processor: Arc<PaymentProcessor>,
    audit: AuditTrail,
    metrics: Metrics,
    config: SchedulerConfig,
    span: Span,
}

impl ReconciliationScheduler {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn GatewayClient>,
        users: Arc<dyn UserDirectory>,
        processor: Arc<PaymentProcessor>,
        audit: AuditTrail,
        metrics: Metrics,
        span: Span,
    ) -> Self {
        Self {
            store,
            gateway,
            users,
            processor,
            audit,
            metrics,
            config: SchedulerConfig::default(),
            span,
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the four loops. They stop once `shutdown` turns true or its
    /// sender is dropped.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(4);

        let scheduler = self.clone();
        let rx = shutdown.clone();
        let span = tracing::info_span!(parent: &self.span, "expire_loop");
        handles.push(tokio::spawn(
            async move {
                scheduler
                    .run_loop("expire", scheduler.config.expire_interval, rx, || {
                        scheduler.expire_payments_once()
                    })
                    .await
            }
            .instrument(span),
        ));

        let scheduler = self.clone();
        let rx = shutdown.clone();
        let span = tracing::info_span!(parent: &self.span, "pending_request_loop");
        handles.push(tokio::spawn(
            async move {
                scheduler
                    .run_loop(
                        "pending_request",
                        scheduler.config.pending_request_interval,
                        rx,
                        || scheduler.process_pending_requests_once(),
                    )
                    .await
            }
            .instrument(span),
        ));

        let scheduler = self.clone();
        let rx = shutdown.clone();
        let span = tracing::info_span!(parent: &self.span, "failed_request_loop");
        handles.push(tokio::spawn(
            async move {
                scheduler
                    .run_loop(
                        "failed_request",
                        scheduler.config.failed_request_interval,
                        rx,
                        || scheduler.requeue_failed_requests_once(),
                    )
                    .await
            }
            .instrument(span),
        ));

        let scheduler = self.clone();
        let span = tracing::info_span!(parent: &self.span, "invoice_poll_loop");
        handles.push(tokio::spawn(
            async move { scheduler.run_invoice_poll_loop(shutdown).await }.instrument(span),
        ));

        handles
    }

    /// Sleep-driven loop: run, then sleep `interval` (or the error backoff).
    async fn run_loop<F, Fut>(
        &self,
        name: &'static str,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        iteration: F,
    ) where
        F: Fn() -> Fut,
        Fut: Future<Output = PaymentResult<usize>>,
    {
        tracing::info!(loop_name = name, ?interval, "Reconciliation loop started");

        while !*shutdown.borrow() {
            let pause = match iteration().await {
                Ok(processed) => {
                    self.record_iteration(name, "ok");
                    if processed > 0 {
                        tracing::info!(loop_name = name, processed, "Reconciliation batch done");
                    }
                    interval
                }
                Err(e) => {
                    self.record_iteration(name, "error");
                    tracing::error!(loop_name = name, error = %e, "Reconciliation batch failed, backing off");
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(loop_name = name, "Reconciliation loop stopped");
    }

    /// Ticker-driven loop; an error just waits for the next tick. The first
    /// poll happens one full interval after start.
    async fn run_invoice_poll_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.invoice_poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.config.invoice_poll_interval, "Invoice poll loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            match self.poll_pending_invoices_once().await {
                Ok(_) => self.record_iteration("invoice_poll", "ok"),
                Err(e) => {
                    self.record_iteration("invoice_poll", "error");
                    tracing::error!(error = %e, "Failed to fetch pending invoices");
                }
            }
        }

        tracing::info!("Invoice poll loop stopped");
    }

    fn record_iteration(&self, name: &str, result: &str) {
        self.metrics
            .scheduler_iterations_total
            .with_label_values(&[name, result])
            .inc();
    }

    /// Mark every PENDING payment past its expiry as EXPIRED.
    pub async fn expire_payments_once(&self) -> PaymentResult<usize> {
        let expired = self.store.get_expired_pending_payments().await?;
        let mut transitioned = 0;

        for payment in expired {
            match self.store.mark_expired(payment.id).await {
                Ok(true) => {
                    transitioned += 1;
                    self.metrics.payments_expired_total.inc();
                    self.audit
                        .record(
                            AuditEntry::new(
                                payment.order_id,
                                AuditEvent::MarkExpired,
                                ACTOR_EXPIRE_PAYMENTS,
                            )
                            .for_payment(&payment),
                        )
                        .await;
                    tracing::info!(order_id = payment.order_id, payment_id = payment.id, "Payment expired");
                }
                Ok(false) => {
                    tracing::debug!(payment_id = payment.id, "Payment left PENDING before expiry");
                }
                Err(e) => {
                    tracing::error!(payment_id = payment.id, error = %e, "Failed to mark payment expired");
                }
            }
        }

        Ok(transitioned)
    }

    /// Turn the oldest PENDING payment requests into gateway invoices.
    pub async fn process_pending_requests_once(&self) -> PaymentResult<usize> {
        let requests = self
            .store
            .get_pending_payment_requests(self.config.batch_size)
            .await?;
        let mut succeeded = 0;

        for request in requests {
            match self.process_pending_request(&request).await {
                Ok(true) => succeeded += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        request_id = request.id,
                        order_id = request.order_id,
                        error = %e,
                        "Failed to process payment request"
                    );
                }
            }
        }

        Ok(succeeded)
    }

    async fn process_pending_request(&self, request: &PaymentRequest) -> PaymentResult<bool> {
        let Some(payment) = self.store.get_payment_by_order_id(request.order_id).await? else {
            self.metrics.payment_requests_skipped_total.inc();
            tracing::warn!(
                request_id = request.id,
                order_id = request.order_id,
                "No payment row for request, skipping; it keeps its slot in the batch"
            );
            return Ok(false);
        };

        let payer_email = match self.users.get_user_email(request.user_id).await {
            Ok(email) => email,
            Err(e) => {
                tracing::warn!(order_id = request.order_id, error = %e, "Payer lookup failed");
                self.store
                    .update_failed_payment_request(request.id, &e.to_string())
                    .await?;
                return Ok(false);
            }
        };

        let external_id = external_id_for(request.order_id);
        let invoice_request = InvoiceRequest {
            external_id: external_id.clone(),
            amount: request.amount,
            description: invoice_description(request.order_id),
            payer_email,
        };
        let result = self.gateway.create_invoice(&invoice_request).await;

        self.audit
            .record(
                AuditEntry::new(request.order_id, AuditEvent::CreateInvoice, ACTOR_PENDING_REQUESTS)
                    .for_payment(&payment),
            )
            .await;

        let invoice = match result {
            Ok(invoice) => invoice,
            Err(e) => {
                self.record_invoice("error");
                tracing::warn!(order_id = request.order_id, error = %e, "Gateway invoice creation failed");
                self.store
                    .update_failed_payment_request(request.id, &e.to_string())
                    .await?;
                return Ok(false);
            }
        };
        self.record_invoice("ok");

        let new_payment = NewPayment {
            order_id: request.order_id,
            user_id: request.user_id,
            external_id,
            amount: request.amount,
            expired_time: invoice.expiry_date,
        };
        match self.store.save_payment(new_payment).await {
            Ok(_) => {}
            Err(PaymentError::Conflict(_)) => {
                tracing::debug!(order_id = request.order_id, "Payment already exists for order");
            }
            Err(e) => {
                self.store
                    .update_failed_payment_request(request.id, &e.to_string())
                    .await?;
                return Err(e);
            }
        }

        self.store.update_success_payment_request(request.id).await?;
        tracing::info!(
            order_id = request.order_id,
            invoice_id = %invoice.id,
            "Payment request fulfilled"
        );
        Ok(true)
    }

    fn record_invoice(&self, result: &str) {
        self.metrics
            .invoices_created_total
            .with_label_values(&["scheduler", result])
            .inc();
    }

    /// Put FAILED requests that are still under the retry ceiling back to PENDING.
    pub async fn requeue_failed_requests_once(&self) -> PaymentResult<usize> {
        let failed = self
            .store
            .get_failed_payment_requests(self.config.batch_size, self.config.max_request_retry)
            .await?;
        let mut requeued = 0;

        for request in failed {
            match self.store.update_pending_payment_request(request.id).await {
                Ok(()) => {
                    requeued += 1;
                    tracing::info!(
                        request_id = request.id,
                        retry_count = request.retry_count,
                        "Payment request requeued"
                    );
                }
                Err(e) => {
                    tracing::warn!(request_id = request.id, error = %e, "Requeue failed");
                    // keeps the retry counter moving so the row cannot stall forever
                    if let Err(e) = self
                        .store
                        .update_failed_payment_request(request.id, &e.to_string())
                        .await
                    {
                        tracing::error!(request_id = request.id, error = %e, "Failed to re-mark payment request");
                    }
                }
            }
        }

        Ok(requeued)
    }

    /// Ask the gateway about recent PENDING invoices and run the success
    /// path for the ones it reports PAID. Heals missed webhooks.
    pub async fn poll_pending_invoices_once(&self) -> PaymentResult<usize> {
        let pending = self.store.get_pending_invoices().await?;
        let mut paid = 0;

        for payment in pending {
            let status = match self.gateway.check_invoice_status(&payment.external_id).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(order_id = payment.order_id, error = %e, "Invoice status check failed");
                    continue;
                }
            };

            if status != INVOICE_STATUS_PAID {
                continue;
            }

            match self.processor.process_payment_success(payment.order_id).await {
                Ok(_) => paid += 1,
                Err(e) => {
                    tracing::error!(order_id = payment.order_id, error = %e, "Failed to settle paid invoice");
                }
            }
        }

        Ok(paid)
    }
}
