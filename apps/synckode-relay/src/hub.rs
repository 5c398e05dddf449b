use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::{ConnectionId, ServerEvent};

pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

/// Outbound queues of every live connection, addressable by connection id.
#[derive(Clone, Default)]
pub struct ConnectionHub {
    peers: Arc<DashMap<ConnectionId, Outbound>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and hand back the receiving end of its queue.
    pub fn register(&self, connection_id: &str) -> (Outbound, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.insert(connection_id.to_string(), tx.clone());
        (tx, rx)
    }

    pub fn unregister(&self, connection_id: &str) {
        self.peers.remove(connection_id);
    }

    /// Send to a single connection. Returns false when it is gone.
    pub fn send(&self, connection_id: &str, event: ServerEvent) -> bool {
        let Some(peer) = self.peers.get(connection_id).map(|entry| entry.value().clone()) else {
            debug!(connection_id, "dropping event for unknown connection");
            return false;
        };
        if peer.send(event).is_err() {
            debug!(connection_id, "dropping event for closed connection");
            return false;
        }
        true
    }

    /// Send a copy of `event` to every target except `except`. Returns the
    /// number of connections that accepted it.
    pub fn multicast<'a, I>(&self, targets: I, except: Option<&str>, event: &ServerEvent) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        targets
            .into_iter()
            .filter(|target| Some(*target) != except)
            .filter(|target| self.send(target, event.clone()))
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn multicast_skips_sender_and_missing_peers() {
        let hub = ConnectionHub::new();
        let (_a_tx, mut a_rx) = hub.register("a");
        let (_b_tx, mut b_rx) = hub.register("b");

        let delivered = hub.multicast(["a", "b", "ghost"], Some("a"), &ServerEvent::Pong);
        assert_eq!(delivered, 1);
        assert!(matches!(b_rx.try_recv(), Ok(ServerEvent::Pong)));
        assert!(a_rx.try_recv().is_err());
    }

    #[test_timeout::timeout]
    fn send_after_unregister_is_dropped() {
        let hub = ConnectionHub::new();
        let (_tx, mut rx) = hub.register("a");
        hub.unregister("a");
        assert!(!hub.send("a", ServerEvent::Pong));
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.connection_count(), 0);
    }
}
