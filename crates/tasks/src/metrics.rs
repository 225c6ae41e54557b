//! Timer queue metrics.

use core::fmt;
use metrics::{Counter, Gauge};

/// Timer queue metrics, labelled with the owning queue name.
#[derive(Clone)]
pub(crate) struct TimerMetrics {
    /// Number of timers scheduled.
    scheduled_total: Counter,
    /// Number of timers that fired.
    fired_total: Counter,
    /// Number of timers cancelled before firing.
    cancelled_total: Counter,
    /// Number of timers currently pending.
    pending: Gauge,
}

impl fmt::Debug for TimerMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerMetrics").finish_non_exhaustive()
    }
}

impl TimerMetrics {
    pub(crate) fn new(queue: &'static str) -> Self {
        Self {
            scheduled_total: metrics::counter!("tasks.timers.scheduled_total", "queue" => queue),
            fired_total: metrics::counter!("tasks.timers.fired_total", "queue" => queue),
            cancelled_total: metrics::counter!("tasks.timers.cancelled_total", "queue" => queue),
            pending: metrics::gauge!("tasks.timers.pending", "queue" => queue),
        }
    }

    pub(crate) fn on_scheduled(&self, pending: usize) {
        self.scheduled_total.increment(1);
        self.pending.set(pending as f64);
    }

    pub(crate) fn on_fired(&self, pending: usize) {
        self.fired_total.increment(1);
        self.pending.set(pending as f64);
    }

    pub(crate) fn on_cancelled(&self, pending: usize) {
        self.cancelled_total.increment(1);
        self.pending.set(pending as f64);
    }
}
