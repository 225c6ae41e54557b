//! Statistics gauges for the address table.

use core::fmt;

use metrics::Gauge;

use crate::table::AddressStats;

pub(crate) struct AddressMetrics {
    /// Addresses the recommender currently holds a registration for.
    given_to_recommender: Gauge,
    blocked: Gauge,
}

impl fmt::Debug for AddressMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressMetrics").finish_non_exhaustive()
    }
}

impl Default for AddressMetrics {
    fn default() -> Self {
        Self {
            given_to_recommender: metrics::gauge!("transport.addresses.given_to_recommender"),
            blocked: metrics::gauge!("transport.addresses.blocked"),
        }
    }
}

impl AddressMetrics {
    pub(crate) fn publish(&self, stats: &AddressStats) {
        self.given_to_recommender.set(stats.given_to_recommender as f64);
        self.blocked.set(stats.blocked as f64);
    }
}
