//! Transport addresses, sessions and their performance properties.

use std::fmt;
use std::time::Duration;

use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};

/// A transport-specific address of a remote peer.
///
/// Inbound addresses were observed on connections the peer opened to us and
/// are only meaningful together with the session they arrived on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportAddress {
    peer: PeerId,
    transport: String,
    multiaddr: Multiaddr,
    inbound: bool,
}

impl TransportAddress {
    /// An address announced by the peer that we may dial.
    pub fn outbound(peer: PeerId, transport: impl Into<String>, multiaddr: Multiaddr) -> Self {
        Self {
            peer,
            transport: transport.into(),
            multiaddr,
            inbound: false,
        }
    }

    /// An address the peer connected to us from.
    pub fn inbound(peer: PeerId, transport: impl Into<String>, multiaddr: Multiaddr) -> Self {
        Self {
            peer,
            transport: transport.into(),
            multiaddr,
            inbound: true,
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Name of the transport plugin responsible for this address.
    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn multiaddr(&self) -> &Multiaddr {
        &self.multiaddr
    }

    pub fn is_inbound(&self) -> bool {
        self.inbound
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transport, self.multiaddr)?;
        if self.inbound {
            f.write_str(" (inbound)")?;
        }
        Ok(())
    }
}

/// Opaque handle of a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Network scope an address lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkScope {
    #[default]
    Unspecified,
    Loopback,
    Lan,
    Wan,
    Bluetooth,
}

/// Performance properties reported by transports and forwarded to the
/// recommender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressProperties {
    /// Hop distance to the peer.
    pub distance: u32,
    /// Observed latency.
    pub delay: Duration,
    /// Inbound utilization in bytes per second.
    pub utilization_in: u32,
    /// Outbound utilization in bytes per second.
    pub utilization_out: u32,
    pub scope: NetworkScope,
}

impl AddressProperties {
    pub fn with_scope(scope: NetworkScope) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }
}
