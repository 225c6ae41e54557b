//! Address events and non-blocking broadcast emitter.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::address::{SessionId, TransportAddress};

/// Address table events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressEvent {
    Added {
        address: TransportAddress,
        session: Option<SessionId>,
    },
    SessionAttached {
        address: TransportAddress,
        session: SessionId,
    },
    Blocked {
        address: TransportAddress,
        session: Option<SessionId>,
        backoff: Duration,
    },
    Unblocked {
        address: TransportAddress,
        session: Option<SessionId>,
    },
    /// The transport withdrew the address; it lingers until its session ends.
    Expired {
        address: TransportAddress,
        session: SessionId,
    },
    Removed {
        address: TransportAddress,
    },
}

impl AddressEvent {
    pub fn address(&self) -> &TransportAddress {
        match self {
            Self::Added { address, .. }
            | Self::SessionAttached { address, .. }
            | Self::Blocked { address, .. }
            | Self::Unblocked { address, .. }
            | Self::Expired { address, .. }
            | Self::Removed { address } => address,
        }
    }
}

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Non-blocking broadcast emitter. Slow subscribers drop events independently.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<AddressEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: AddressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AddressEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use libp2p::Multiaddr;

    use super::*;
    use crate::test_utils::test_peer_id;

    #[tokio::test]
    async fn test_emitter_fan_out() {
        let emitter = EventEmitter::new(8);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();
        assert_eq!(emitter.subscriber_count(), 2);

        let address = TransportAddress::outbound(
            test_peer_id(1),
            "tcp",
            "/ip4/10.0.0.1/tcp/4001".parse::<Multiaddr>().unwrap(),
        );
        emitter.emit(AddressEvent::Removed {
            address: address.clone(),
        });

        assert_matches!(rx1.recv().await, Ok(AddressEvent::Removed { address: a }) if a == address);
        assert_matches!(rx2.recv().await, Ok(AddressEvent::Removed { .. }));
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let emitter = EventEmitter::default();
        let address = TransportAddress::outbound(test_peer_id(2), "tcp", Multiaddr::empty());
        emitter.emit(AddressEvent::Removed { address });
        assert_eq!(emitter.subscriber_count(), 0);
    }
}
