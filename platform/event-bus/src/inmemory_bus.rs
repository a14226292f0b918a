//! In-memory implementation of the EventBus trait for testing and development

use crate::{BusMessage, BusResult, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// EventBus implementation using in-memory channels
///
/// Suitable for unit tests and local runs with `BUS_TYPE=inmemory`. Every
/// message goes to one broadcast channel; each subscriber filters by its own
/// pattern. The most recent published messages are also kept in a bounded
/// history so tests can assert on what was sent without racing a subscriber.
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
    history: Arc<Mutex<VecDeque<BusMessage>>>,
    history_limit: usize,
}

impl InMemoryBus {
    /// Create a bus with a 1000 message buffer. Slow subscribers lose the
    /// oldest messages once the buffer is exceeded.
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// The history keeps the last `buffer_size` messages as well.
    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
            history: Arc::new(Mutex::new(VecDeque::with_capacity(buffer_size))),
            history_limit: buffer_size,
        }
    }

    /// The retained history, oldest first.
    pub fn published(&self) -> Vec<BusMessage> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Published messages on one exact subject.
    pub fn published_on(&self, subject: &str) -> Vec<BusMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.subject == subject)
            .collect()
    }

    /// NATS-style subject matching: `*` is one token, `>` is one or more.
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        let pattern_tokens: Vec<&str> = pattern.split('.').collect();

        for (i, pattern_token) in pattern_tokens.iter().enumerate() {
            match *pattern_token {
                ">" => return i < subject_tokens.len(),
                "*" if i < subject_tokens.len() => continue,
                token if subject_tokens.get(i) == Some(&token) => continue,
                _ => return false,
            }
        }

        subject_tokens.len() == pattern_tokens.len()
    }

    fn deliver(&self, msg: BusMessage) {
        if let Ok(mut history) = self.history.lock() {
            if history.len() >= self.history_limit {
                history.pop_front();
            }
            history.push_back(msg.clone());
        }
        // no receivers is fine
        let _ = self.sender.send(msg);
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.deliver(BusMessage::new(subject.to_string(), payload));
        Ok(())
    }

    async fn publish_with_headers(
        &self,
        subject: &str,
        headers: HashMap<String, String>,
        payload: Vec<u8>,
    ) -> BusResult<()> {
        self.deliver(BusMessage::new(subject.to_string(), payload).with_headers(headers));
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, pattern = %pattern, "InMemoryBus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }
}
