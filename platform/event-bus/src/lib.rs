//! # EventBus Abstraction
//!
//! Publish/subscribe seam shared by the payment services. Producers hand the
//! bus a subject and raw bytes; consumers get a stream of [`BusMessage`]s.
//!
//! ## Implementations
//!
//! - **NatsBus**: production implementation backed by a NATS connection
//! - **InMemoryBus**: dev/test implementation on top of a broadcast channel
//!
//! ## Keys
//!
//! Some consumers need per-entity ordering (all events for `order-42` handled
//! in order). The bus carries that as the [`PARTITION_KEY_HEADER`] header via
//! [`EventBus::publish_keyed`].
//!
//! ```rust,no_run
//! use event_bus::{EventBus, InMemoryBus};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryBus::new();
//! let mut stream = bus.subscribe("payment.>").await?;
//!
//! bus.publish_keyed("payment.success", "order-42", br#"{"order_id":42}"#.to_vec())
//!     .await?;
//!
//! let msg = stream.next().await.unwrap();
//! assert_eq!(msg.partition_key(), Some("order-42"));
//! # Ok(())
//! # }
//! ```

mod inmemory_bus;
mod nats_bus;
pub mod retry;

pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

/// Header carrying the ordering key of a message.
pub const PARTITION_KEY_HEADER: &str = "partition-key";

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject/topic this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    pub headers: Option<HashMap<String, String>>,
    /// Optional reply-to subject (for request-response patterns)
    pub reply_to: Option<String>,
}

impl BusMessage {
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            payload,
            headers: None,
            reply_to: None,
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_reply_to(mut self, reply_to: String) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(name))
            .map(String::as_str)
    }

    /// The ordering key set by [`EventBus::publish_keyed`], if any.
    pub fn partition_key(&self) -> Option<&str> {
        self.header(PARTITION_KEY_HEADER)
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Publish-subscribe messaging used between the payment service and the rest
/// of the platform.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish raw bytes to a subject.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Publish with headers attached. Implementations that cannot carry
    /// headers may drop them, which is what the default does.
    async fn publish_with_headers(
        &self,
        subject: &str,
        headers: HashMap<String, String>,
        payload: Vec<u8>,
    ) -> BusResult<()> {
        let _ = headers;
        self.publish(subject, payload).await
    }

    /// Publish with an ordering key (`order-<id>` for payment events).
    async fn publish_keyed(&self, subject: &str, key: &str, payload: Vec<u8>) -> BusResult<()> {
        let mut headers = HashMap::new();
        headers.insert(PARTITION_KEY_HEADER.to_string(), key.to_string());
        self.publish_with_headers(subject, headers, payload).await
    }

    /// Subscribe to messages matching a subject pattern.
    ///
    /// Patterns follow NATS rules: `*` matches one token, `>` matches the rest.
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
