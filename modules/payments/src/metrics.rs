use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Prometheus collectors for the payment core. Cloning shares the same
/// underlying counters.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    pub webhooks_total: IntCounterVec,
    pub payments_marked_paid_total: IntCounter,
    pub payments_expired_total: IntCounter,
    pub payment_anomalies_total: IntCounter,
    pub publish_attempts_total: IntCounterVec,
    pub dead_letters_total: IntCounter,
    pub scheduler_iterations_total: IntCounterVec,
    pub invoices_created_total: IntCounterVec,
    pub payment_requests_skipped_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let webhooks_total = IntCounterVec::new(
            Opts::new("payments_webhooks_total", "Gateway webhooks handled"),
            &["outcome"], // paid|acknowledged|ignored|rejected|error
        )
        .expect("metric");

        let payments_marked_paid_total = IntCounter::new(
            "payments_marked_paid_total",
            "Payments transitioned to PAID",
        )
        .expect("metric");

        let payments_expired_total = IntCounter::new(
            "payments_expired_total",
            "Payments transitioned to EXPIRED",
        )
        .expect("metric");

        let payment_anomalies_total = IntCounter::new(
            "payments_anomalies_total",
            "Webhook amount mismatches recorded",
        )
        .expect("metric");

        let publish_attempts_total = IntCounterVec::new(
            Opts::new(
                "payments_publish_attempts_total",
                "Payment success publish attempts",
            ),
            &["result"], // ok|error
        )
        .expect("metric");

        let dead_letters_total = IntCounter::new(
            "payments_dead_letters_total",
            "Payment success events moved to failed_events",
        )
        .expect("metric");

        let scheduler_iterations_total = IntCounterVec::new(
            Opts::new(
                "payments_scheduler_iterations_total",
                "Reconciliation loop iterations",
            ),
            &["loop", "result"], // result: ok|error
        )
        .expect("metric");

        let invoices_created_total = IntCounterVec::new(
            Opts::new("payments_invoices_created_total", "Gateway invoice creations"),
            &["source", "result"], // source: intake|scheduler
        )
        .expect("metric");

        let payment_requests_skipped_total = IntCounter::new(
            "payments_requests_skipped_total",
            "Pending payment requests skipped for lack of a payment row",
        )
        .expect("metric");

        registry
            .register(Box::new(webhooks_total.clone()))
            .expect("register");
        registry
            .register(Box::new(payments_marked_paid_total.clone()))
            .expect("register");
        registry
            .register(Box::new(payments_expired_total.clone()))
            .expect("register");
        registry
            .register(Box::new(payment_anomalies_total.clone()))
            .expect("register");
        registry
            .register(Box::new(publish_attempts_total.clone()))
            .expect("register");
        registry
            .register(Box::new(dead_letters_total.clone()))
            .expect("register");
        registry
            .register(Box::new(scheduler_iterations_total.clone()))
            .expect("register");
        registry
            .register(Box::new(invoices_created_total.clone()))
            .expect("register");
        registry
            .register(Box::new(payment_requests_skipped_total.clone()))
            .expect("register");

        Self {
            registry,
            webhooks_total,
            payments_marked_paid_total,
            payments_expired_total,
            payment_anomalies_total,
            publish_attempts_total,
            dead_letters_total,
            scheduler_iterations_total,
            invoices_created_total,
            payment_requests_skipped_total,
        }
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&mf, &mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
