//! Order payments: gateway invoices, webhook reconciliation, reliable
//! payment-success events and the background loops that keep local state
//! convergent with the gateway.

pub mod audit;
pub mod config;
pub mod consumer;
pub mod db;
pub mod error;
pub mod gateway;
pub mod intake;
pub mod invoice_pdf;
pub mod metrics;
pub mod models;
pub mod processor;
pub mod publisher;
pub mod routes;
pub mod scheduler;
pub mod store;
pub mod users;
pub mod webhook;

pub use audit::AuditTrail;
pub use config::Config;
pub use consumer::start_order_created_consumer;
pub use error::{PaymentError, PaymentResult};
pub use gateway::{GatewayClient, GatewayError, Invoice, InvoiceRequest, XenditClient, XenditConfig};
pub use intake::{IntakeOutcome, OrderIntake};
pub use invoice_pdf::{InvoiceRenderer, InvoiceService, PdfInvoiceRenderer};
pub use metrics::Metrics;
pub use processor::{PaymentProcessor, SuccessOutcome};
pub use publisher::EventPublisher;
pub use routes::{payments_router, AppState};
pub use scheduler::{ReconciliationScheduler, SchedulerConfig};
pub use store::{InMemoryPaymentStore, PaymentStore, PgPaymentStore};
pub use users::{HttpUserDirectory, UserDirectory, UserLookupError};
pub use webhook::{WebhookOutcome, WebhookPayload, WebhookProcessor};
