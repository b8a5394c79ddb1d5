//! Notification publishers
//!
//! Delivery is best-effort: a publisher never blocks and never fails the
//! caller. A missing subscriber or a lagging one just drops messages.

use tokio::sync::broadcast;
use tracing::trace;

use super::ports::NotificationPublisher;
use crate::domain::Notification;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Fan-out to in-process subscribers (socket gateway, feed-only binary, tests)
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl NotificationPublisher for BroadcastPublisher {
    fn publish(&self, notification: Notification) {
        let topic = notification.topic.clone();
        if self.sender.send(notification).is_err() {
            trace!(topic = %topic, "No subscribers, notification dropped");
        }
    }
}
