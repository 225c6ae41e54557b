//! Operation counters.

use core::fmt;

use metrics::Counter;

use crate::protocol::OperationType;

pub(crate) struct SetMetrics {
    initiated_union: Counter,
    initiated_intersection: Counter,
    accepted_union: Counter,
    accepted_intersection: Counter,
}

impl fmt::Debug for SetMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetMetrics").finish_non_exhaustive()
    }
}

const INITIATED: &str = "set.operations.initiated";
const ACCEPTED: &str = "set.operations.accepted";

impl Default for SetMetrics {
    fn default() -> Self {
        Self {
            initiated_union: metrics::counter!(INITIATED, "operation" => "union"),
            initiated_intersection: metrics::counter!(INITIATED, "operation" => "intersection"),
            accepted_union: metrics::counter!(ACCEPTED, "operation" => "union"),
            accepted_intersection: metrics::counter!(ACCEPTED, "operation" => "intersection"),
        }
    }
}

impl SetMetrics {
    pub(crate) fn initiated(&self, operation: OperationType) {
        match operation {
            OperationType::Union => self.initiated_union.increment(1),
            OperationType::Intersection => self.initiated_intersection.increment(1),
        }
    }

    pub(crate) fn accepted(&self, operation: OperationType) {
        match operation {
            OperationType::Union => self.accepted_union.increment(1),
            OperationType::Intersection => self.accepted_intersection.increment(1),
        }
    }
}
