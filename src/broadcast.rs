//! Fan-out of server events to every connected observer.
//!
//! The queue engine is the sole publisher of state-machine events; the
//! screenshot differ and the websocket layer publish their own kinds.

use tokio::sync::broadcast;

use crate::events::ServerEvent;

#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    /// Send to all subscribers. Send errors (no receivers) are ignored.
    pub fn publish(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_every_subscriber() {
        let broadcaster = EventBroadcaster::new();
        let mut rx1 = broadcaster.subscribe();
        let mut rx2 = broadcaster.subscribe();

        broadcaster.publish(ServerEvent::chat("hello"));

        assert!(matches!(
            rx1.recv().await.unwrap(),
            ServerEvent::ChatResponse { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            ServerEvent::ChatResponse { .. }
        ));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let broadcaster = EventBroadcaster::new();
        broadcaster.publish(ServerEvent::chat("nobody home"));
        assert_eq!(broadcaster.receiver_count(), 0);
    }
}
