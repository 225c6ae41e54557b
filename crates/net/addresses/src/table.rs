//! The address table: known addresses per peer, their sessions and blocking state.

use std::time::Duration;

use libp2p::PeerId;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::address::{AddressProperties, NetworkScope, SessionId, TransportAddress};
use crate::backoff::BackoffPolicy;
use crate::blocking::BlockingScheduler;
use crate::config::AddressTableConfig;
use crate::events::{AddressEvent, EventEmitter};
use crate::metrics::AddressMetrics;
use crate::record::{AddressSnapshot, RecordKey, RecordStore};
use crate::traits::{PropertyManipulator, Recommender};

/// Counters published to the statistics sink after every mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressStats {
    pub total: usize,
    pub blocked: usize,
    /// Addresses currently registered with the recommender (`total - blocked`).
    pub given_to_recommender: usize,
}

/// Tracks every `(peer, address, session)` triple reported by transports and
/// keeps the [`Recommender`] informed about the ones that are not blocked.
///
/// Entry points that can only be reached for addresses the caller registered
/// itself (`block`, `expire`, double insertion) panic on misuse. Loose
/// notifications (`update_*`, `del_session` for probing sessions) ignore
/// unknown addresses. Every mutating entry point ignores the local peer.
pub struct AddressTable<R: Recommender, M = ()> {
    local_peer: PeerId,
    backoff: BackoffPolicy,
    recommender: R,
    manipulator: M,
    store: RecordStore<R::Handle>,
    scheduler: BlockingScheduler,
    events: EventEmitter,
    metrics: AddressMetrics,
}

impl<R: Recommender> AddressTable<R> {
    pub fn new(local_peer: PeerId, config: &AddressTableConfig, recommender: R) -> Self {
        Self::with_manipulator(local_peer, config, recommender, ())
    }
}

impl<R: Recommender, M: PropertyManipulator> AddressTable<R, M> {
    pub fn with_manipulator(
        local_peer: PeerId,
        config: &AddressTableConfig,
        recommender: R,
        manipulator: M,
    ) -> Self {
        Self {
            local_peer,
            backoff: config.backoff_policy(),
            recommender,
            manipulator,
            store: RecordStore::default(),
            scheduler: BlockingScheduler::default(),
            events: EventEmitter::new(config.event_channel_capacity),
            metrics: AddressMetrics::default(),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn recommender(&self) -> &R {
        &self.recommender
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AddressEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> AddressStats {
        let total = self.store.len();
        let blocked = self.scheduler.blocked();
        AddressStats {
            total,
            blocked,
            given_to_recommender: total.saturating_sub(blocked),
        }
    }

    /// Snapshots of all records held for `peer`.
    pub fn addresses(&self, peer: &PeerId) -> Vec<AddressSnapshot> {
        self.store.peer(peer).map(|r| r.snapshot()).collect()
    }

    /// Whether a record exists for exactly this `(address, session)`,
    /// including blocked and expired ones.
    pub fn is_known(&self, address: &TransportAddress, session: Option<SessionId>) -> bool {
        self.store.find(address, session).is_some()
    }

    /// Whether an unexpired record exists for `address`, whatever its session.
    pub fn is_known_ignoring_session(&self, address: &TransportAddress) -> bool {
        self.store.find_ignoring_session(address).is_some()
    }

    /// Register an address a peer connected to us from.
    ///
    /// # Panics
    ///
    /// If the address is not flagged inbound or `(address, session)` is
    /// already known.
    pub fn add_inbound(
        &mut self,
        address: TransportAddress,
        session: SessionId,
        properties: AddressProperties,
    ) {
        if self.is_own(&address) || !is_sane(&address, &properties) {
            return;
        }
        assert!(address.is_inbound(), "{address} is not an inbound address");
        assert!(
            self.store.find(&address, Some(session)).is_none(),
            "inbound {address} with {session} is already known"
        );

        debug!(
            peer = %address.peer(),
            %address,
            %session,
            scope = ?properties.scope,
            "new inbound address"
        );
        let handle = self
            .recommender
            .register(&address, Some(session), &properties);
        self.events.emit(AddressEvent::Added {
            address: address.clone(),
            session: Some(session),
        });
        self.store.insert(address, Some(session), properties, handle);
        self.publish();
    }

    /// Register an address a peer announced and that we may dial.
    ///
    /// # Panics
    ///
    /// If the address is flagged inbound or already known without a session.
    pub fn add_outbound(&mut self, address: TransportAddress, properties: AddressProperties) {
        if self.is_own(&address) || !is_sane(&address, &properties) {
            return;
        }
        assert!(!address.is_inbound(), "{address} is an inbound address");
        assert!(
            self.store.find_ignoring_session(&address).is_none(),
            "outbound {address} is already known"
        );

        info!(peer = %address.peer(), %address, scope = ?properties.scope, "new outbound address");
        let handle = self.recommender.register(&address, None, &properties);
        self.events.emit(AddressEvent::Added {
            address: address.clone(),
            session: None,
        });
        self.store.insert(address, None, properties, handle);
        self.publish();
    }

    /// Attach a fresh session to a sessionless record.
    ///
    /// A blocked record keeps the session to itself until it is unblocked.
    /// Repeating the call for a pair that is already known is accepted, since
    /// transports recycle sessions.
    ///
    /// # Panics
    ///
    /// If neither the sessionless record nor the pair is known.
    pub fn new_session(&mut self, address: &TransportAddress, session: SessionId) {
        if self.is_own(address) {
            return;
        }
        let Some(record) = self.store.find_mut(address, None) else {
            assert!(
                self.store.find(address, Some(session)).is_some(),
                "new {session} for unknown {address}"
            );
            trace!(%address, %session, "session recycled");
            return;
        };

        record.session = Some(session);
        match &record.active {
            Some(handle) => self.recommender.add_session(handle, session),
            None => assert!(
                record.unblock.is_some(),
                "blocked {address} has no unblock timer"
            ),
        }
        debug!(
            peer = %address.peer(),
            %address,
            %session,
            blocked = record.active.is_none(),
            "session attached"
        );
        self.events.emit(AddressEvent::SessionAttached {
            address: address.clone(),
            session,
        });
    }

    /// Withdraw an address from recommendation after it failed to work.
    ///
    /// The backoff doubles (capped) on every block without an intervening
    /// [`reset_block`](Self::reset_block), and the address comes back once
    /// [`unblock_expired`](Self::unblock_expired) runs past the deadline.
    ///
    /// # Panics
    ///
    /// If `(address, session)` is not known.
    pub fn block(&mut self, address: &TransportAddress, session: Option<SessionId>) {
        if self.is_own(address) {
            return;
        }
        let Some(record) = self.store.find_mut(address, session) else {
            panic!("cannot block unknown {address} with {session:?}");
        };
        let Some(handle) = record.active.take() else {
            warn!(%address, ?session, "address is already blocked");
            return;
        };

        let released = session.is_some_and(|s| self.recommender.remove_session(&handle, s));
        if !released {
            self.recommender.destroy(handle);
        }

        let backoff = self.backoff.next(record.backoff);
        record.backoff = backoff;
        record.blocked_until = Some(Instant::now() + backoff);
        record.unblock = Some(self.scheduler.block(record.key(), backoff));

        if address.is_inbound() {
            debug!(
                peer = %address.peer(),
                %address,
                ?session,
                ?backoff,
                "blocking inbound address"
            );
        } else {
            info!(
                peer = %address.peer(),
                %address,
                ?session,
                ?backoff,
                "blocking outbound address"
            );
        }
        self.events.emit(AddressEvent::Blocked {
            address: address.clone(),
            session,
            backoff,
        });
        self.publish();
    }

    /// Forget accumulated backoff after the address was used successfully.
    ///
    /// # Panics
    ///
    /// If the address is currently blocked.
    pub fn reset_block(&mut self, address: &TransportAddress, session: Option<SessionId>) {
        if self.is_own(address) {
            return;
        }
        let Some(record) = self.store.find_mut(address, session) else {
            warn!(%address, ?session, "reset_block for unknown address");
            return;
        };
        assert!(
            record.unblock.is_none(),
            "reset_block on {address} while it is blocked"
        );
        record.backoff = Duration::ZERO;
        record.blocked_until = None;
        trace!(%address, ?session, "backoff reset");
    }

    /// Re-register every address whose blocking period is over.
    ///
    /// Returns the number of addresses unblocked.
    pub fn unblock_expired(&mut self) -> usize {
        let now = Instant::now();
        let mut unblocked = 0;
        while let Some(fired) = self.scheduler.pop_unblocked(now) {
            let Some(record) = self.store.get_mut(fired.key) else {
                warn!(id = %fired.id, "unblock timer outlived its address");
                continue;
            };
            let timer = record.unblock.take();
            assert!(
                timer.is_some_and(|t| t.is(fired.id)),
                "unblock timer of {} does not match {}",
                record.address,
                fired.id
            );

            let handle = self
                .recommender
                .register(&record.address, record.session, &record.properties);
            record.active = Some(handle);
            record.blocked_until = None;
            debug!(
                peer = %record.address.peer(),
                address = %record.address,
                session = ?record.session,
                "address unblocked"
            );
            self.events.emit(AddressEvent::Unblocked {
                address: record.address.clone(),
                session: record.session,
            });
            unblocked += 1;
        }
        if unblocked > 0 {
            self.publish();
        }
        unblocked
    }

    /// When [`unblock_expired`](Self::unblock_expired) next has work to do.
    pub fn next_unblock_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// A session ended.
    ///
    /// Pairs that were never registered (sessions opened only for probing)
    /// are ignored.
    pub fn del_session(&mut self, address: &TransportAddress, session: SessionId) {
        if self.is_own(address) {
            return;
        }
        let Some(record) = self.store.find_mut(address, Some(session)) else {
            if address.is_inbound() {
                warn!(%address, %session, "session ended for unknown inbound address");
            } else {
                trace!(%address, %session, "session ended for unregistered outbound address");
            }
            return;
        };

        record.session = None;
        debug!(
            peer = %address.peer(),
            %address,
            %session,
            expired = record.expired,
            "session ended"
        );

        if record.expired {
            if let Some(handle) = record.active.take()
                && !self.recommender.remove_session(&handle, session)
            {
                self.recommender.destroy(handle);
            }
            let key = record.key();
            self.destroy(key);
            return;
        }

        let Some(handle) = &record.active else {
            // Blocked: an inbound address is useless without its session,
            // an outbound one waits for its unblock.
            if address.is_inbound() {
                let key = record.key();
                self.destroy(key);
            }
            return;
        };
        if self.recommender.remove_session(handle, session) {
            record.active = None;
            let key = record.key();
            self.destroy(key);
        }
    }

    pub fn update_distance(&mut self, address: &TransportAddress, distance: u32) {
        self.update_properties(address, |p| p.distance = distance);
    }

    pub fn update_delay(&mut self, address: &TransportAddress, delay: Duration) {
        self.update_properties(address, |p| p.delay = delay);
    }

    pub fn update_utilization(
        &mut self,
        address: &TransportAddress,
        utilization_in: u32,
        utilization_out: u32,
    ) {
        self.update_properties(address, |p| {
            p.utilization_in = utilization_in;
            p.utilization_out = utilization_out;
        });
    }

    fn update_properties(
        &mut self,
        address: &TransportAddress,
        apply: impl FnOnce(&mut AddressProperties),
    ) {
        let Some(record) = self.store.find_ignoring_session_mut(address) else {
            trace!(%address, "property update for unknown address");
            return;
        };
        apply(&mut record.properties);
        self.manipulator
            .manipulate(&record.address, record.session, &mut record.properties);
        if let Some(handle) = &record.active {
            self.recommender.update(handle, &record.properties);
        }
    }

    /// The transport withdrew the address.
    ///
    /// A record with a live session lingers until [`del_session`](Self::del_session).
    ///
    /// # Panics
    ///
    /// If the address is not known.
    pub fn expire(&mut self, address: &TransportAddress) {
        if self.is_own(address) {
            return;
        }
        let Some(record) = self.store.find_ignoring_session_mut(address) else {
            panic!("cannot expire unknown {address}");
        };
        match record.session {
            Some(session) => {
                record.expired = true;
                debug!(
                    peer = %address.peer(),
                    %address,
                    %session,
                    "address expired, waiting for session end"
                );
                self.events.emit(AddressEvent::Expired {
                    address: address.clone(),
                    session,
                });
            }
            None => {
                let key = record.key();
                self.destroy(key);
            }
        }
    }

    /// Destroy every record, cancelling pending unblock timers.
    pub fn shutdown(&mut self) {
        for key in self.store.keys() {
            if let Some(record) = self.store.get_mut(key) {
                record.session = None;
            }
            self.destroy(key);
        }
        debug!(stats = ?self.stats(), "address table shut down");
    }

    fn destroy(&mut self, key: RecordKey) {
        let Some(mut record) = self.store.remove(key) else {
            return;
        };
        assert!(
            record.session.is_none(),
            "{} destroyed while its session is alive",
            record.address
        );
        if let Some(timer) = record.unblock.take() {
            self.scheduler.cancel(timer);
        }
        if let Some(handle) = record.active.take() {
            self.recommender.destroy(handle);
        }
        debug!(peer = %record.address.peer(), address = %record.address, "address removed");
        self.events.emit(AddressEvent::Removed {
            address: record.address,
        });
        self.publish();
    }

    fn is_own(&self, address: &TransportAddress) -> bool {
        let own = address.peer() == &self.local_peer;
        if own {
            trace!(%address, "ignoring own address");
        }
        own
    }

    fn publish(&self) {
        self.metrics.publish(&self.stats());
    }
}

fn is_sane(address: &TransportAddress, properties: &AddressProperties) -> bool {
    if address.transport().is_empty() {
        warn!(%address, "address without transport name");
        return false;
    }
    if properties.scope == NetworkScope::Unspecified {
        warn!(%address, "address without network scope");
    }
    true
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::test_utils::{MockRecommender, inbound, outbound, test_peer_id};

    fn table() -> AddressTable<MockRecommender> {
        AddressTable::new(
            test_peer_id(0),
            &AddressTableConfig::default(),
            MockRecommender::default(),
        )
    }

    fn wan() -> AddressProperties {
        AddressProperties::with_scope(NetworkScope::Wan)
    }

    #[test]
    fn test_add_outbound_registers() {
        let mut table = table();
        let address = outbound(1, 4001);

        table.add_outbound(address.clone(), wan());

        assert!(table.is_known(&address, None));
        assert!(table.is_known_ignoring_session(&address));
        assert_eq!(table.recommender().live.len(), 1);
        assert_eq!(
            table.stats(),
            AddressStats {
                total: 1,
                blocked: 0,
                given_to_recommender: 1
            }
        );
    }

    #[test]
    fn test_own_addresses_ignored() {
        let mut table = table();
        let own = outbound(0, 4001);

        table.add_outbound(own.clone(), wan());
        table.block(&own, None);
        table.expire(&own);

        assert!(!table.is_known_ignoring_session(&own));
        assert!(table.recommender().live.is_empty());
    }

    #[test]
    fn test_empty_transport_name_ignored() {
        let mut table = table();
        let multiaddr = outbound(1, 4001).multiaddr().clone();
        let address = TransportAddress::outbound(test_peer_id(1), "", multiaddr);

        table.add_outbound(address.clone(), wan());

        assert!(!table.is_known(&address, None));
    }

    #[test]
    #[should_panic(expected = "already known")]
    fn test_double_inbound_panics() {
        let mut table = table();
        let address = inbound(1, 4001);
        table.add_inbound(address.clone(), SessionId(1), wan());
        table.add_inbound(address, SessionId(1), wan());
    }

    #[test]
    #[should_panic(expected = "already known")]
    fn test_double_outbound_panics() {
        let mut table = table();
        table.add_outbound(outbound(1, 4001), wan());
        table.add_outbound(outbound(1, 4001), wan());
    }

    #[test]
    fn test_inbound_keyed_by_session() {
        let mut table = table();
        let address = inbound(1, 4001);

        table.add_inbound(address.clone(), SessionId(1), wan());
        table.add_inbound(address.clone(), SessionId(2), wan());

        assert!(table.is_known(&address, Some(SessionId(1))));
        assert!(table.is_known(&address, Some(SessionId(2))));
        assert!(!table.is_known(&address, None));
        assert_eq!(table.stats().total, 2);
    }

    #[test]
    fn test_new_session_on_active_address() {
        let mut table = table();
        let address = outbound(1, 4001);
        table.add_outbound(address.clone(), wan());

        table.new_session(&address, SessionId(7));

        assert!(table.is_known(&address, Some(SessionId(7))));
        assert!(!table.is_known(&address, None));
        let registration = table.recommender().find(&address).unwrap();
        assert_eq!(registration.sessions, vec![SessionId(7)]);

        // Recycled session is accepted.
        table.new_session(&address, SessionId(7));
        let registration = table.recommender().find(&address).unwrap();
        assert_eq!(registration.sessions, vec![SessionId(7)]);
    }

    #[test]
    #[should_panic(expected = "unknown")]
    fn test_new_session_unknown_panics() {
        let mut table = table();
        table.new_session(&outbound(1, 4001), SessionId(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_while_blocked_waits_for_unblock() {
        let mut table = table();
        let address = outbound(1, 4001);
        table.add_outbound(address.clone(), wan());
        table.block(&address, None);

        table.new_session(&address, SessionId(3));
        assert!(table.recommender().find(&address).is_none());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(table.unblock_expired(), 1);

        let registration = table.recommender().find(&address).unwrap();
        assert_eq!(registration.sessions, vec![SessionId(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_and_unblock() {
        let mut table = table();
        let address = outbound(1, 4001);
        table.add_outbound(address.clone(), wan());

        table.block(&address, None);
        assert!(table.recommender().live.is_empty());
        assert_eq!(table.stats().blocked, 1);
        assert_eq!(table.stats().given_to_recommender, 0);
        let snapshot = table.addresses(address.peer()).pop().unwrap();
        assert!(snapshot.blocked);
        assert_eq!(snapshot.backoff, Duration::from_millis(2));

        // Blocking twice is tolerated.
        table.block(&address, None);
        assert_eq!(table.stats().blocked, 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(table.unblock_expired(), 0);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(table.unblock_expired(), 1);

        assert_eq!(table.stats().blocked, 0);
        assert_eq!(table.recommender().live.len(), 1);
        assert!(table.next_unblock_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_until_reset() {
        let mut table = table();
        let address = outbound(1, 4001);
        table.add_outbound(address.clone(), wan());

        let mut observed = Vec::new();
        for _ in 0..3 {
            table.block(&address, None);
            let backoff = table.addresses(address.peer()).pop().unwrap().backoff;
            observed.push(backoff);
            tokio::time::advance(backoff).await;
            assert_eq!(table.unblock_expired(), 1);
        }
        assert_eq!(
            observed,
            vec![
                Duration::from_millis(2),
                Duration::from_millis(4),
                Duration::from_millis(8)
            ]
        );

        table.reset_block(&address, None);
        table.block(&address, None);
        assert_eq!(
            table.addresses(address.peer()).pop().unwrap().backoff,
            Duration::from_millis(2)
        );
    }

    #[test]
    #[should_panic(expected = "while it is blocked")]
    fn test_reset_block_while_blocked_panics() {
        let mut table = table();
        let address = outbound(1, 4001);
        table.add_outbound(address.clone(), wan());
        table.block(&address, None);
        table.reset_block(&address, None);
    }

    #[test]
    #[should_panic(expected = "cannot block unknown")]
    fn test_block_unknown_panics() {
        let mut table = table();
        table.block(&outbound(1, 4001), None);
    }

    #[test]
    fn test_block_inbound_session_releases_registration() {
        let mut table = table();
        let address = inbound(1, 4001);
        table.add_inbound(address.clone(), SessionId(1), wan());

        table.block(&address, Some(SessionId(1)));

        assert!(table.recommender().live.is_empty());
        assert_eq!(table.recommender().destroyed_total, 0);
        assert!(table.is_known(&address, Some(SessionId(1))));
    }

    #[test]
    fn test_del_session_inbound_active_destroys_record() {
        let mut table = table();
        let address = inbound(1, 4001);
        table.add_inbound(address.clone(), SessionId(1), wan());

        table.del_session(&address, SessionId(1));

        assert!(!table.is_known(&address, Some(SessionId(1))));
        assert!(table.recommender().live.is_empty());
        assert_eq!(table.stats().total, 0);
    }

    #[test]
    fn test_del_session_outbound_active_keeps_record() {
        let mut table = table();
        let address = outbound(1, 4001);
        table.add_outbound(address.clone(), wan());
        table.new_session(&address, SessionId(1));

        table.del_session(&address, SessionId(1));

        assert!(table.is_known(&address, None));
        let registration = table.recommender().find(&address).unwrap();
        assert!(registration.sessions.is_empty());
    }

    #[test]
    fn test_del_session_inbound_blocked_destroys_record() {
        let mut table = table();
        let address = inbound(1, 4001);
        table.add_inbound(address.clone(), SessionId(1), wan());
        table.block(&address, Some(SessionId(1)));
        assert_eq!(table.stats().blocked, 1);

        table.del_session(&address, SessionId(1));

        assert_eq!(table.stats(), AddressStats::default());
        assert!(table.next_unblock_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_del_session_outbound_blocked_keeps_record() {
        let mut table = table();
        let address = outbound(1, 4001);
        table.add_outbound(address.clone(), wan());
        table.new_session(&address, SessionId(1));
        table.block(&address, Some(SessionId(1)));

        table.del_session(&address, SessionId(1));

        assert!(table.is_known(&address, None));
        assert_eq!(table.stats().blocked, 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        table.unblock_expired();
        let registration = table.recommender().find(&address).unwrap();
        assert!(registration.sessions.is_empty());
    }

    #[test]
    fn test_del_session_expired_inbound_destroys_record() {
        let mut table = table();
        let address = inbound(1, 4001);
        table.add_inbound(address.clone(), SessionId(1), wan());
        table.expire(&address);
        assert!(table.is_known(&address, Some(SessionId(1))));

        table.del_session(&address, SessionId(1));

        assert!(!table.is_known(&address, Some(SessionId(1))));
        assert!(table.recommender().live.is_empty());
        // Removing the last session already released the registration.
        assert_eq!(table.recommender().destroyed_total, 0);
        assert_eq!(table.stats(), AddressStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unblock_reregisters_inbound_with_session() {
        let mut table = table();
        let address = inbound(1, 4001);
        table.add_inbound(address.clone(), SessionId(1), wan());
        table.block(&address, Some(SessionId(1)));
        assert!(table.recommender().find(&address).is_none());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(table.unblock_expired(), 1);

        let registration = table.recommender().find(&address).unwrap();
        assert_eq!(registration.sessions, vec![SessionId(1)]);
        assert_eq!(table.recommender().registered_total, 2);
        assert_eq!(table.stats().given_to_recommender, 1);
        assert_eq!(table.stats().blocked, 0);

        table.del_session(&address, SessionId(1));
        assert_eq!(table.stats(), AddressStats::default());
    }

    #[test]
    fn test_del_session_unknown_pair_ignored() {
        let mut table = table();
        table.del_session(&outbound(1, 4001), SessionId(9));
        table.del_session(&inbound(1, 4001), SessionId(9));
        assert_eq!(table.stats(), AddressStats::default());
    }

    #[test]
    fn test_expire_with_session_defers_destruction() {
        let mut table = table();
        let address = outbound(1, 4001);
        table.add_outbound(address.clone(), wan());
        table.new_session(&address, SessionId(1));

        table.expire(&address);
        assert!(table.is_known(&address, Some(SessionId(1))));
        assert!(!table.is_known_ignoring_session(&address));

        table.del_session(&address, SessionId(1));
        assert!(!table.is_known(&address, Some(SessionId(1))));
        assert!(table.recommender().live.is_empty());
        assert_eq!(table.recommender().destroyed_total, 1);
    }

    #[test]
    fn test_expire_without_session_destroys() {
        let mut table = table();
        let address = outbound(1, 4001);
        table.add_outbound(address.clone(), wan());
        table.block(&address, None);

        table.expire(&address);

        assert_eq!(table.stats(), AddressStats::default());
        assert!(table.next_unblock_deadline().is_none());
    }

    #[test]
    #[should_panic(expected = "cannot expire unknown")]
    fn test_expire_unknown_panics() {
        let mut table = table();
        table.expire(&outbound(1, 4001));
    }

    #[derive(Debug)]
    struct AddHop;

    impl PropertyManipulator for AddHop {
        fn manipulate(
            &self,
            _address: &TransportAddress,
            _session: Option<SessionId>,
            properties: &mut AddressProperties,
        ) {
            properties.distance += 1;
        }
    }

    #[test]
    fn test_updates_pass_manipulator_and_skip_blocked() {
        let mut table = AddressTable::with_manipulator(
            test_peer_id(0),
            &AddressTableConfig::default(),
            MockRecommender::default(),
            AddHop,
        );
        let address = outbound(1, 4001);
        table.add_outbound(address.clone(), wan());

        table.update_distance(&address, 3);
        table.update_delay(&address, Duration::from_millis(40));
        table.update_utilization(&address, 100, 200);

        // Every update runs the hook once more over the stored properties.
        let pushed = table.recommender().find(&address).unwrap().properties;
        assert_eq!(pushed.distance, 6);
        assert_eq!(pushed.delay, Duration::from_millis(40));
        assert_eq!((pushed.utilization_in, pushed.utilization_out), (100, 200));

        table.block(&address, None);
        table.update_distance(&address, 10);
        let snapshot = table.addresses(address.peer()).pop().unwrap();
        assert_eq!(snapshot.properties.distance, 11);
        assert!(table.recommender().find(&address).is_none());

        // Unknown addresses are ignored.
        table.update_distance(&outbound(2, 4001), 1);
    }

    #[test]
    fn test_blocked_counter_returns_to_zero() {
        let mut table = table();
        let addresses: Vec<_> = (1..=5).map(|n| outbound(n, 4001)).collect();
        for address in &addresses {
            table.add_outbound(address.clone(), wan());
            table.block(address, None);
        }
        assert_eq!(table.stats().blocked, 5);

        for address in &addresses {
            table.expire(address);
        }
        assert_eq!(table.stats(), AddressStats::default());
    }

    #[test]
    fn test_shutdown_destroys_everything() {
        let mut table = table();
        table.add_outbound(outbound(1, 4001), wan());
        table.add_inbound(inbound(2, 4001), SessionId(1), wan());
        table.add_outbound(outbound(3, 4001), wan());
        table.block(&outbound(3, 4001), None);

        table.shutdown();

        assert_eq!(table.stats(), AddressStats::default());
        assert!(table.recommender().live.is_empty());
        assert!(table.next_unblock_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events() {
        let mut table = table();
        let mut rx = table.subscribe();
        let address = outbound(1, 4001);

        table.add_outbound(address.clone(), wan());
        table.new_session(&address, SessionId(1));
        table.block(&address, Some(SessionId(1)));
        tokio::time::advance(Duration::from_millis(2)).await;
        table.unblock_expired();
        table.expire(&address);
        table.del_session(&address, SessionId(1));

        assert_matches!(rx.recv().await, Ok(AddressEvent::Added { session: None, .. }));
        assert_matches!(
            rx.recv().await,
            Ok(AddressEvent::SessionAttached { session: SessionId(1), .. })
        );
        assert_matches!(
            rx.recv().await,
            Ok(AddressEvent::Blocked { backoff, .. }) if backoff == Duration::from_millis(2)
        );
        assert_matches!(
            rx.recv().await,
            Ok(AddressEvent::Unblocked { session: Some(SessionId(1)), .. })
        );
        assert_matches!(rx.recv().await, Ok(AddressEvent::Expired { .. }));
        assert_matches!(rx.recv().await, Ok(AddressEvent::Removed { address: a }) if a == address);
    }
}
