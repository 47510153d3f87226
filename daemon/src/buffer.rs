/// The message buffer between notification producers and the dispatcher.
///
/// A bounded FIFO: producers wait when it is full, so a slow dispatcher slows
/// them down instead of losing messages.
use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, Mutex};

use crate::settings::{DEFAULT_BUFFER_CAPACITY, MAX_BUFFER_CAPACITY};

/// A notification waiting to be delivered to every configured chat.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub text: String,
    /// Free-form annotations (e.g. which monitor target produced the message).
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Local>,
}

impl OutboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: BTreeMap::new(),
            created_at: Local::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Bounded FIFO of outbound messages shared by many producers and one consumer.
///
/// `put` waits while the buffer is full; nothing is ever dropped.
pub struct MessageBuffer {
    tx: mpsc::Sender<OutboundMessage>,
    rx: Mutex<mpsc::Receiver<OutboundMessage>>,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl MessageBuffer {
    /// Creates a buffer holding up to `capacity` messages, clamped to [1, 10000].
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.clamp(1, MAX_BUFFER_CAPACITY));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Enqueues `message`, waiting for a free slot if the buffer is full.
    pub async fn put(&self, message: OutboundMessage) {
        // The buffer owns the receiver, so the channel cannot be closed here.
        let _ = self.tx.send(message).await;
    }

    /// Waits for and removes the oldest message.
    ///
    /// Returns `None` only if the channel was closed, which cannot happen
    /// while the buffer is alive.
    pub async fn get(&self) -> Option<OutboundMessage> {
        self.rx.lock().await.recv().await
    }

    /// Best-effort snapshot; may be stale by the time the caller looks at it.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort count of queued messages.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}
