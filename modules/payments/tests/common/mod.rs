//! Shared fixtures for the payment integration tests: in-memory store and
//! bus, scripted gateway and user directory, and a harness wiring them into
//! the real services.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use event_bus::retry::RetryConfig;
use event_bus::{BusError, BusMessage, BusResult, EventBus, InMemoryBus};
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::Span;

use order_payments::gateway::{GatewayClient, GatewayError, Invoice, InvoiceRequest};
use order_payments::models::{NewPayment, NewPaymentRequest, Payment, PaymentRequest};
use order_payments::users::{UserDirectory, UserLookupError};
use order_payments::{
    AuditTrail, EventPublisher, InMemoryPaymentStore, InvoiceService, Metrics, OrderIntake,
    PaymentProcessor, PaymentStore, PdfInvoiceRenderer, ReconciliationScheduler, SchedulerConfig,
    WebhookProcessor,
};

pub const WEBHOOK_TOKEN: &str = "test-callback-token";

// ============================================================================
// GATEWAY
// ============================================================================

/// Scripted gateway. Records every invoice request; statuses are looked up
/// by external id.
#[derive(Default)]
pub struct FakeGateway {
    requests: Mutex<Vec<InvoiceRequest>>,
    statuses: Mutex<HashMap<String, String>>,
    fail_create: AtomicBool,
    status_checks: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_status(&self, external_id: &str, status: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(external_id.to_string(), status.to_string());
    }

    pub fn invoice_requests(&self) -> Vec<InvoiceRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn status_checks(&self) -> usize {
        self.status_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayClient for FakeGateway {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Api {
                status_code: 503,
                message: r#"{"error_code":"SERVER_ERROR"}"#.to_string(),
            });
        }

        Ok(Invoice {
            id: format!("inv_{}", request.external_id),
            external_id: request.external_id.clone(),
            status: "PENDING".to_string(),
            invoice_url: format!("https://checkout.example/{}", request.external_id),
            expiry_date: Utc::now() + ChronoDuration::hours(24),
        })
    }

    async fn check_invoice_status(&self, external_id: &str) -> Result<String, GatewayError> {
        self.status_checks.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .get(external_id)
            .cloned()
            .ok_or_else(|| GatewayError::InvoiceNotFound(external_id.to_string()))
    }
}

// ============================================================================
// USERS
// ============================================================================

/// `user<id>@example.com` for every user except the ones marked missing.
#[derive(Default)]
pub struct FakeUsers {
    missing: Mutex<Vec<i64>>,
}

impl FakeUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_missing(&self, user_id: i64) {
        self.missing.lock().unwrap().push(user_id);
    }
}

#[async_trait]
impl UserDirectory for FakeUsers {
    async fn get_user_email(&self, user_id: i64) -> Result<String, UserLookupError> {
        if self.missing.lock().unwrap().contains(&user_id) {
            return Err(UserLookupError::NotFound(user_id));
        }
        Ok(format!("user{user_id}@example.com"))
    }
}

// ============================================================================
// BUS
// ============================================================================

/// Fails the first `failures` publishes, then behaves like the wrapped
/// [`InMemoryBus`].
pub struct FlakyBus {
    inner: InMemoryBus,
    remaining_failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyBus {
    pub fn new(inner: InMemoryBus, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EventBus for FlakyBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        if self.should_fail() {
            return Err(BusError::PublishError("bus unavailable".to_string()));
        }
        self.inner.publish(subject, payload).await
    }

    async fn publish_with_headers(
        &self,
        subject: &str,
        headers: HashMap<String, String>,
        payload: Vec<u8>,
    ) -> BusResult<()> {
        if self.should_fail() {
            return Err(BusError::PublishError("bus unavailable".to_string()));
        }
        self.inner.publish_with_headers(subject, headers, payload).await
    }

    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        self.inner.subscribe(subject).await
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// Millisecond backoff so retry paths stay fast outside paused-time tests.
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        backoff_after_final_attempt: true,
    }
}

pub struct Harness {
    pub store: Arc<InMemoryPaymentStore>,
    pub bus: InMemoryBus,
    pub gateway: Arc<FakeGateway>,
    pub users: Arc<FakeUsers>,
    pub metrics: Metrics,
    pub processor: Arc<PaymentProcessor>,
    pub webhook: Arc<WebhookProcessor>,
    pub scheduler: Arc<ReconciliationScheduler>,
    pub invoice_dir: std::path::PathBuf,
    audit: AuditTrail,
}

impl Harness {
    /// Everything in memory, a healthy bus and fast retries.
    pub fn new() -> Self {
        let bus = InMemoryBus::new();
        Self::build(Arc::new(bus.clone()), bus, fast_retry())
    }

    /// Publishes go through `publish_bus`; `bus` is what tests inspect.
    pub fn build(publish_bus: Arc<dyn EventBus>, bus: InMemoryBus, retry: RetryConfig) -> Self {
        let store = Arc::new(InMemoryPaymentStore::new());
        let dyn_store: Arc<dyn PaymentStore> = store.clone();
        let gateway = Arc::new(FakeGateway::new());
        let users = Arc::new(FakeUsers::new());
        let metrics = Metrics::new();

        let audit = AuditTrail::new(dyn_store.clone(), Span::none());
        let publisher = Arc::new(
            EventPublisher::new(
                publish_bus,
                dyn_store.clone(),
                audit.clone(),
                metrics.clone(),
                Span::none(),
            )
            .with_retry(retry),
        );
        let processor = Arc::new(PaymentProcessor::new(
            dyn_store.clone(),
            publisher,
            audit.clone(),
            metrics.clone(),
            Span::none(),
        ));
        let webhook = Arc::new(WebhookProcessor::new(
            dyn_store.clone(),
            processor.clone(),
            WEBHOOK_TOKEN,
            metrics.clone(),
            Span::none(),
        ));
        let scheduler = Arc::new(ReconciliationScheduler::new(
            dyn_store,
            gateway.clone(),
            users.clone(),
            processor.clone(),
            audit.clone(),
            metrics.clone(),
            Span::none(),
        ));

        let invoice_dir = std::env::temp_dir().join(format!(
            "order-payments-it-{}-{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::SeqCst)
        ));

        Self {
            store,
            bus,
            gateway,
            users,
            metrics,
            processor,
            webhook,
            scheduler,
            invoice_dir,
            audit,
        }
    }

    pub fn intake(&self, defer_invoice_creation: bool) -> Arc<OrderIntake> {
        Arc::new(OrderIntake::new(
            self.store.clone(),
            self.gateway.clone(),
            self.users.clone(),
            self.audit.clone(),
            self.metrics.clone(),
            defer_invoice_creation,
            Span::none(),
        ))
    }

    /// A second scheduler over the same store, gateway and processor.
    pub fn scheduler_with_config(&self, config: SchedulerConfig) -> ReconciliationScheduler {
        ReconciliationScheduler::new(
            self.store.clone(),
            self.gateway.clone(),
            self.users.clone(),
            self.processor.clone(),
            self.audit.clone(),
            self.metrics.clone(),
            Span::none(),
        )
        .with_config(config)
    }

    pub fn invoices(&self) -> Arc<InvoiceService> {
        Arc::new(InvoiceService::new(
            self.store.clone(),
            Arc::new(PdfInvoiceRenderer),
            self.invoice_dir.clone(),
            Span::none(),
        ))
    }

    /// PENDING payment for `order_id`, amount in whole currency units.
    pub async fn seed_payment(&self, order_id: i64, amount: i64) -> Payment {
        self.seed_payment_expiring(order_id, amount, ChronoDuration::hours(24))
            .await
    }

    pub async fn seed_payment_expiring(
        &self,
        order_id: i64,
        amount: i64,
        expires_in: ChronoDuration,
    ) -> Payment {
        self.store
            .save_payment(NewPayment {
                order_id,
                user_id: 7,
                external_id: format!("order-{order_id}"),
                amount: Decimal::from(amount),
                expired_time: Utc::now() + expires_in,
            })
            .await
            .unwrap()
    }

    pub async fn seed_request(&self, order_id: i64, amount: i64) -> PaymentRequest {
        self.seed_request_for(order_id, 7, amount).await
    }

    pub async fn seed_request_for(&self, order_id: i64, user_id: i64, amount: i64) -> PaymentRequest {
        self.store
            .save_payment_request(NewPaymentRequest {
                order_id,
                user_id,
                amount: Decimal::from(amount),
            })
            .await
            .unwrap()
    }
}

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);
