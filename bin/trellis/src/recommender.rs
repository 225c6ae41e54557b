//! Recommender that only records and logs what it is told.

use std::collections::HashMap;

use tracing::{debug, info};
use trellis_net_addresses::{AddressProperties, Recommender, SessionId, TransportAddress};

#[derive(Debug)]
struct Registration {
    address: TransportAddress,
    sessions: Vec<SessionId>,
}

/// Stand-in until a scoring recommender is wired in.
#[derive(Debug, Default)]
pub(crate) struct LoggingRecommender {
    next_handle: u64,
    live: HashMap<u64, Registration>,
}

impl LoggingRecommender {
    pub(crate) fn live(&self) -> usize {
        self.live.len()
    }
}

impl Recommender for LoggingRecommender {
    type Handle = u64;

    fn register(
        &mut self,
        address: &TransportAddress,
        session: Option<SessionId>,
        properties: &AddressProperties,
    ) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        info!(%address, ?session, ?properties, handle, "address eligible for recommendation");
        self.live.insert(
            handle,
            Registration {
                address: address.clone(),
                sessions: session.into_iter().collect(),
            },
        );
        handle
    }

    fn add_session(&mut self, handle: &u64, session: SessionId) {
        if let Some(registration) = self.live.get_mut(handle) {
            registration.sessions.push(session);
            debug!(address = %registration.address, ?session, "session added");
        }
    }

    fn update(&mut self, handle: &u64, properties: &AddressProperties) {
        if let Some(registration) = self.live.get(handle) {
            debug!(address = %registration.address, ?properties, "properties updated");
        }
    }

    fn remove_session(&mut self, handle: &u64, session: SessionId) -> bool {
        let Some(registration) = self.live.get_mut(handle) else {
            return false;
        };
        registration.sessions.retain(|s| *s != session);
        if registration.address.is_inbound() && registration.sessions.is_empty() {
            debug!(address = %registration.address, "inbound registration released");
            self.live.remove(handle);
            return true;
        }
        false
    }

    fn destroy(&mut self, handle: u64) {
        if let Some(registration) = self.live.remove(&handle) {
            info!(address = %registration.address, "address withdrawn from recommendation");
        }
    }
}
