use anyhow::Context;
use event_bus::{EventBus, InMemoryBus, NatsBus};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use order_payments::{
    db, payments_router, start_order_created_consumer, AppState, AuditTrail, Config,
    EventPublisher, HttpUserDirectory, InvoiceService, Metrics, OrderIntake, PaymentProcessor,
    PaymentStore, PdfInvoiceRenderer, PgPaymentStore, ReconciliationScheduler, WebhookProcessor,
    XenditClient, XenditConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().map_err(anyhow::Error::msg)?;

    // Database connection
    tracing::info!("Connecting to database...");
    let pool = db::init_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Running migrations...");
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    // Create event bus
    let bus: Arc<dyn EventBus> = match config.bus_type.as_str() {
        "nats" => {
            tracing::info!("Connecting to NATS at {}", config.nats_url);
            Arc::new(
                NatsBus::connect(&config.nats_url)
                    .await
                    .context("Failed to connect to NATS")?,
            )
        }
        _ => {
            tracing::info!("Using InMemory event bus");
            Arc::new(InMemoryBus::new())
        }
    };

    let metrics = Metrics::new();
    let store: Arc<dyn PaymentStore> = Arc::new(PgPaymentStore::new(pool));
    let gateway = Arc::new(XenditClient::new(XenditConfig::new(
        config.xendit_secret_api_key.clone(),
        config.xendit_base_url.clone(),
    ))?);
    let users = Arc::new(HttpUserDirectory::new(config.user_service_url.clone())?);

    let audit = AuditTrail::new(store.clone(), tracing::info_span!("audit"));
    let publisher = Arc::new(
        EventPublisher::new(
            bus.clone(),
            store.clone(),
            audit.clone(),
            metrics.clone(),
            tracing::info_span!("publisher"),
        )
        .with_subject(config.payment_success_subject.clone()),
    );
    let processor = Arc::new(PaymentProcessor::new(
        store.clone(),
        publisher,
        audit.clone(),
        metrics.clone(),
        tracing::info_span!("payment_processor"),
    ));
    let webhook = Arc::new(WebhookProcessor::new(
        store.clone(),
        processor.clone(),
        config.xendit_webhook_token.clone(),
        metrics.clone(),
        tracing::info_span!("webhook_processor"),
    ));
    let invoices = Arc::new(InvoiceService::new(
        store.clone(),
        Arc::new(PdfInvoiceRenderer),
        config.invoice_dir.clone(),
        tracing::info_span!("invoice_service"),
    ));
    let intake = Arc::new(OrderIntake::new(
        store.clone(),
        gateway.clone(),
        users.clone(),
        audit.clone(),
        metrics.clone(),
        config.disable_create_invoice_directly,
        tracing::info_span!("order_intake"),
    ));
    let scheduler = Arc::new(ReconciliationScheduler::new(
        store,
        gateway,
        users,
        processor,
        audit,
        metrics.clone(),
        tracing::info_span!("scheduler"),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = scheduler.spawn(shutdown_rx.clone());
    tasks.push(start_order_created_consumer(
        bus,
        intake,
        config.order_created_subject.clone(),
        shutdown_rx,
    ));

    let app = payments_router(AppState {
        webhook,
        invoices,
        metrics,
    })
    .layer(
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("HOST/PORT do not form a socket address")?;
    tracing::info!("Order payments service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server failed")?;

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("Background tasks stopped");

    Ok(())
}
