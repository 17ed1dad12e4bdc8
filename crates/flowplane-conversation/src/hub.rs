//! The in-memory subscriber registry.
//!
//! One bounded queue per subscriber. Broadcast never blocks: a subscriber
//! whose queue is full (or whose receiver is gone) is dropped on the
//! spot. Ordering is per-subscriber, not global across subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use flowplane_core::ConversationId;

use crate::frames::Frame;

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// A live subscription to one conversation.
pub struct Subscription {
    /// Subscriber id, needed to unsubscribe.
    pub id: u64,
    /// Frame receiver.
    pub rx: mpsc::Receiver<Frame>,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Frame>,
}

/// Fan-out registry: `conversation_id → set of subscribers`.
pub struct ConversationHub {
    queue_depth: usize,
    next_id: AtomicU64,
    inner: Mutex<HashMap<ConversationId, Vec<Subscriber>>>,
}

impl Default for ConversationHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl ConversationHub {
    /// Create a hub with the given per-subscriber queue depth.
    #[must_use]
    pub fn new(queue_depth: usize) -> Self {
        Self {
            queue_depth: queue_depth.max(1),
            next_id: AtomicU64::new(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a conversation.
    #[must_use]
    pub fn subscribe(&self, conversation_id: ConversationId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .lock()
            .entry(conversation_id)
            .or_default()
            .push(Subscriber { id, tx });

        tracing::debug!(conversation_id = %conversation_id, subscriber = id, "Subscribed");
        Subscription { id, rx }
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, conversation_id: ConversationId, subscriber_id: u64) {
        let mut inner = self.inner.lock();
        if let Some(subscribers) = inner.get_mut(&conversation_id) {
            subscribers.retain(|s| s.id != subscriber_id);
            if subscribers.is_empty() {
                inner.remove(&conversation_id);
            }
        }
    }

    /// Broadcast a frame to every subscriber of a conversation,
    /// non-blocking. Slow or gone subscribers are dropped.
    pub fn broadcast(&self, conversation_id: ConversationId, frame: &Frame) {
        let mut inner = self.inner.lock();
        let Some(subscribers) = inner.get_mut(&conversation_id) else {
            return;
        };

        subscribers.retain(|subscriber| match subscriber.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    subscriber = subscriber.id,
                    "Dropping slow subscriber"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if subscribers.is_empty() {
            inner.remove(&conversation_id);
        }
    }

    /// Number of live subscribers for a conversation.
    #[must_use]
    pub fn subscriber_count(&self, conversation_id: ConversationId) -> usize {
        self.inner
            .lock()
            .get(&conversation_id)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_broadcast_order() {
        let hub = ConversationHub::default();
        let conversation = ConversationId::generate();
        let mut subscription = hub.subscribe(conversation);

        hub.broadcast(conversation, &Frame::Connected);
        hub.broadcast(
            conversation,
            &Frame::Stream {
                content: "a".into(),
            },
        );
        hub.broadcast(conversation, &Frame::Complete);

        assert_eq!(subscription.rx.recv().await.unwrap(), Frame::Connected);
        assert!(matches!(
            subscription.rx.recv().await.unwrap(),
            Frame::Stream { .. }
        ));
        assert_eq!(subscription.rx.recv().await.unwrap(), Frame::Complete);
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_when_queue_fills() {
        let hub = ConversationHub::new(2);
        let conversation = ConversationId::generate();
        let _subscription = hub.subscribe(conversation);

        for i in 0..3 {
            hub.broadcast(
                conversation,
                &Frame::Stream {
                    content: format!("{i}"),
                },
            );
        }

        // Two frames fit; the third overflowed and evicted the subscriber.
        assert_eq!(hub.subscriber_count(conversation), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_that_subscriber() {
        let hub = ConversationHub::default();
        let conversation = ConversationId::generate();
        let first = hub.subscribe(conversation);
        let _second = hub.subscribe(conversation);

        hub.unsubscribe(conversation, first.id);
        assert_eq!(hub.subscriber_count(conversation), 1);
    }

    #[tokio::test]
    async fn broadcast_to_empty_conversation_is_a_noop() {
        let hub = ConversationHub::default();
        hub.broadcast(ConversationId::generate(), &Frame::Complete);
    }
}
