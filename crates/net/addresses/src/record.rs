//! Address records and the per-peer record store.

use std::collections::HashMap;
use std::time::Duration;

use libp2p::PeerId;
use tokio::time::Instant;
use trellis_tasks::Timer;

use crate::address::{AddressProperties, SessionId, TransportAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RecordId(u64);

#[cfg(test)]
impl RecordId {
    pub(crate) fn for_tests(n: u64) -> Self {
        Self(n)
    }
}

/// Identifies a record across the store; used as the unblock timer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RecordKey {
    pub(crate) peer: PeerId,
    pub(crate) id: RecordId,
}

/// One `(peer, address, session)` triple.
///
/// `active` holds the recommender registration and is `Some` exactly when the
/// record is not blocked, which is also exactly when `unblock` is `None`.
#[derive(Debug)]
pub(crate) struct AddressRecord<H> {
    pub(crate) id: RecordId,
    pub(crate) address: TransportAddress,
    pub(crate) session: Option<SessionId>,
    pub(crate) properties: AddressProperties,
    pub(crate) active: Option<H>,
    pub(crate) blocked_until: Option<Instant>,
    pub(crate) backoff: Duration,
    pub(crate) unblock: Option<Timer>,
    /// Withdrawn by the transport, kept alive only by its session.
    pub(crate) expired: bool,
}

impl<H> AddressRecord<H> {
    pub(crate) fn key(&self) -> RecordKey {
        RecordKey {
            peer: *self.address.peer(),
            id: self.id,
        }
    }

    pub(crate) fn is_blocked(&self) -> bool {
        debug_assert_eq!(self.active.is_none(), self.unblock.is_some());
        self.active.is_none()
    }

    fn matches(&self, address: &TransportAddress, session: Option<SessionId>) -> bool {
        self.session == session && &self.address == address
    }

    pub(crate) fn snapshot(&self) -> AddressSnapshot {
        AddressSnapshot {
            address: self.address.clone(),
            session: self.session,
            properties: self.properties,
            blocked: self.is_blocked(),
            blocked_until: self.blocked_until,
            backoff: self.backoff,
            expired: self.expired,
        }
    }
}

/// Point-in-time view of an address record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSnapshot {
    pub address: TransportAddress,
    pub session: Option<SessionId>,
    pub properties: AddressProperties,
    /// No recommender registration; waiting for the unblock timer.
    pub blocked: bool,
    pub blocked_until: Option<Instant>,
    pub backoff: Duration,
    pub expired: bool,
}

/// Records grouped by peer.
#[derive(Debug)]
pub(crate) struct RecordStore<H> {
    by_peer: HashMap<PeerId, Vec<AddressRecord<H>>>,
    len: usize,
    next_id: u64,
}

impl<H> Default for RecordStore<H> {
    fn default() -> Self {
        Self {
            by_peer: HashMap::new(),
            len: 0,
            next_id: 0,
        }
    }
}

impl<H> RecordStore<H> {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn insert(
        &mut self,
        address: TransportAddress,
        session: Option<SessionId>,
        properties: AddressProperties,
        active: H,
    ) {
        let id = RecordId(self.next_id);
        self.next_id += 1;
        self.len += 1;
        self.by_peer
            .entry(*address.peer())
            .or_default()
            .push(AddressRecord {
                id,
                address,
                session,
                properties,
                active: Some(active),
                blocked_until: None,
                backoff: Duration::ZERO,
                unblock: None,
                expired: false,
            });
    }

    /// Exact `(address, session)` match, expired records included.
    pub(crate) fn find(
        &self,
        address: &TransportAddress,
        session: Option<SessionId>,
    ) -> Option<&AddressRecord<H>> {
        self.by_peer
            .get(address.peer())?
            .iter()
            .find(|r| r.matches(address, session))
    }

    pub(crate) fn find_mut(
        &mut self,
        address: &TransportAddress,
        session: Option<SessionId>,
    ) -> Option<&mut AddressRecord<H>> {
        self.by_peer
            .get_mut(address.peer())?
            .iter_mut()
            .find(|r| r.matches(address, session))
    }

    /// First unexpired record for `address`, whatever its session.
    pub(crate) fn find_ignoring_session(
        &self,
        address: &TransportAddress,
    ) -> Option<&AddressRecord<H>> {
        self.by_peer
            .get(address.peer())?
            .iter()
            .find(|r| !r.expired && &r.address == address)
    }

    pub(crate) fn find_ignoring_session_mut(
        &mut self,
        address: &TransportAddress,
    ) -> Option<&mut AddressRecord<H>> {
        self.by_peer
            .get_mut(address.peer())?
            .iter_mut()
            .find(|r| !r.expired && &r.address == address)
    }

    pub(crate) fn get_mut(&mut self, key: RecordKey) -> Option<&mut AddressRecord<H>> {
        self.by_peer
            .get_mut(&key.peer)?
            .iter_mut()
            .find(|r| r.id == key.id)
    }

    pub(crate) fn remove(&mut self, key: RecordKey) -> Option<AddressRecord<H>> {
        let records = self.by_peer.get_mut(&key.peer)?;
        let position = records.iter().position(|r| r.id == key.id)?;
        let record = records.swap_remove(position);
        if records.is_empty() {
            self.by_peer.remove(&key.peer);
        }
        self.len -= 1;
        Some(record)
    }

    pub(crate) fn peer(&self, peer: &PeerId) -> impl Iterator<Item = &AddressRecord<H>> {
        self.by_peer.get(peer).into_iter().flatten()
    }

    pub(crate) fn keys(&self) -> Vec<RecordKey> {
        self.by_peer.values().flatten().map(AddressRecord::key).collect()
    }
}
