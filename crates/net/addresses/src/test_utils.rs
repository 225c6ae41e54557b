//! Test doubles for the recommender seam.

use std::collections::HashMap;

use libp2p::{Multiaddr, PeerId};

use crate::address::{AddressProperties, SessionId, TransportAddress};
use crate::traits::Recommender;

pub(crate) fn test_peer_id(n: u8) -> PeerId {
    let bytes = [n; 32];
    let key = libp2p::identity::ed25519::SecretKey::try_from_bytes(bytes).unwrap();
    let keypair = libp2p::identity::Keypair::from(libp2p::identity::ed25519::Keypair::from(key));
    keypair.public().to_peer_id()
}

pub(crate) fn outbound(peer: u8, port: u16) -> TransportAddress {
    let multiaddr: Multiaddr = format!("/ip4/10.0.0.{peer}/tcp/{port}").parse().unwrap();
    TransportAddress::outbound(test_peer_id(peer), "tcp", multiaddr)
}

pub(crate) fn inbound(peer: u8, port: u16) -> TransportAddress {
    let multiaddr: Multiaddr = format!("/ip4/10.0.0.{peer}/tcp/{port}").parse().unwrap();
    TransportAddress::inbound(test_peer_id(peer), "tcp", multiaddr)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Registration {
    pub(crate) address: TransportAddress,
    pub(crate) sessions: Vec<SessionId>,
    pub(crate) properties: AddressProperties,
}

/// Recommender keeping every live registration in memory.
#[derive(Debug, Default)]
pub(crate) struct MockRecommender {
    next: u64,
    pub(crate) live: HashMap<u64, Registration>,
    pub(crate) registered_total: usize,
    pub(crate) destroyed_total: usize,
}

impl MockRecommender {
    pub(crate) fn find(&self, address: &TransportAddress) -> Option<&Registration> {
        self.live.values().find(|r| &r.address == address)
    }
}

impl Recommender for MockRecommender {
    type Handle = u64;

    fn register(
        &mut self,
        address: &TransportAddress,
        session: Option<SessionId>,
        properties: &AddressProperties,
    ) -> u64 {
        let handle = self.next;
        self.next += 1;
        self.registered_total += 1;
        self.live.insert(
            handle,
            Registration {
                address: address.clone(),
                sessions: session.into_iter().collect(),
                properties: *properties,
            },
        );
        handle
    }

    fn add_session(&mut self, handle: &u64, session: SessionId) {
        let registration = self.live.get_mut(handle).expect("live handle");
        registration.sessions.push(session);
    }

    fn update(&mut self, handle: &u64, properties: &AddressProperties) {
        let registration = self.live.get_mut(handle).expect("live handle");
        registration.properties = *properties;
    }

    fn remove_session(&mut self, handle: &u64, session: SessionId) -> bool {
        let registration = self.live.get_mut(handle).expect("live handle");
        registration.sessions.retain(|s| *s != session);
        if registration.address.is_inbound() && registration.sessions.is_empty() {
            self.live.remove(handle);
            return true;
        }
        false
    }

    fn destroy(&mut self, handle: u64) {
        assert!(self.live.remove(&handle).is_some(), "double destroy");
        self.destroyed_total += 1;
    }
}
