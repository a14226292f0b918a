use event_bus::{BusMessage, EventBus};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::intake::OrderIntake;
use crate::models::OrderCreatedEvent;

pub const DEFAULT_ORDER_CREATED_SUBJECT: &str = "order.created";

/// Start the consumer task for order-created events.
///
/// Malformed messages are logged and skipped. Intake failures are logged;
/// redelivery is up to the producer side.
pub fn start_order_created_consumer(
    bus: Arc<dyn EventBus>,
    intake: Arc<OrderIntake>,
    subject: String,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = match bus.subscribe(&subject).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(subject = %subject, error = %e, "Failed to subscribe");
                return;
            }
        };

        tracing::info!(subject = %subject, "Subscribed to order-created events");

        loop {
            let msg = tokio::select! {
                next = stream.next() => match next {
                    Some(msg) => msg,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            handle_message(&intake, &msg).await;
        }

        tracing::warn!(subject = %subject, "Order-created consumer stopped");
    })
}

async fn handle_message(intake: &OrderIntake, msg: &BusMessage) {
    let event: OrderCreatedEvent = match serde_json::from_slice(&msg.payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(
                subject = %msg.subject,
                error = %e,
                "Failed to parse order-created event, skipping"
            );
            return;
        }
    };

    let span = tracing::info_span!(
        "process_event",
        subject = %msg.subject,
        order_id = event.order_id,
        partition_key = %msg.partition_key().unwrap_or("none")
    );

    async {
        match intake.handle_order_created(event).await {
            Ok(outcome) => tracing::debug!(?outcome, "Order-created event handled"),
            Err(e) => tracing::error!(error = %e, "Order-created event failed"),
        }
    }
    .instrument(span)
    .await;
}
