//! Delivery lifecycle events.
//!
//! The mailer and worker publish these over a broadcast channel; the CLI
//! and tests subscribe when they care. Publishing with no subscribers is
//! fine, the event is simply dropped.

use tokio::sync::broadcast;

/// What happened to a message.
#[derive(Debug, Clone)]
pub enum MailEvent {
    /// The transport accepted the message.
    MessageSent {
        recipient: String,
        elapsed_ms: u64,
    },
    /// The transport (or a pre-flight check) rejected the message.
    MessageFailed {
        recipient: String,
        error: String,
        will_retry: bool,
    },
}

const EVENT_CAPACITY: usize = 256;

/// Broadcast fan-out for [`MailEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MailEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publishes an event. Lagging or absent subscribers never block the
    /// sender.
    pub fn emit(&self, event: MailEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MailEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(MailEvent::MessageSent {
            recipient: "user@example.com".to_string(),
            elapsed_ms: 12,
        });

        match rx.recv().await.expect("event delivered") {
            MailEvent::MessageSent { recipient, .. } => {
                assert_eq!(recipient, "user@example.com");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(MailEvent::MessageFailed {
            recipient: "user@example.com".to_string(),
            error: "boom".to_string(),
            will_retry: true,
        });
    }
}
