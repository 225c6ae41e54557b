//! Unblock timers and the blocked-address counter.
//!
//! The counter moves only together with a timer: it goes up when a timer is
//! scheduled and down when that same timer either fires or is cancelled.
//! Because [`Timer`] handles cannot be copied, neither can happen twice.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use trellis_tasks::{Expired, Timer, TimerQueue};

use crate::record::RecordKey;

#[derive(Debug)]
pub(crate) struct BlockingScheduler {
    timers: TimerQueue<RecordKey>,
    blocked: usize,
}

impl Default for BlockingScheduler {
    fn default() -> Self {
        Self {
            timers: TimerQueue::new("address_unblock"),
            blocked: 0,
        }
    }
}

impl BlockingScheduler {
    pub(crate) fn blocked(&self) -> usize {
        self.blocked
    }

    /// Start a blocking period of `backoff` for the record.
    pub(crate) fn block(&mut self, key: RecordKey, backoff: Duration) -> Timer {
        self.blocked += 1;
        self.timers.schedule(backoff, key)
    }

    /// End a blocking period early, e.g. because the record is destroyed.
    pub(crate) fn cancel(&mut self, timer: Timer) {
        let id = timer.id();
        match self.timers.cancel(timer) {
            Some(_) => self.blocked -= 1,
            None => debug!(%id, "unblock timer already fired"),
        }
    }

    /// Next record whose blocking period is over.
    pub(crate) fn pop_unblocked(&mut self, now: Instant) -> Option<Expired<RecordKey>> {
        let fired = self.timers.pop_expired(now)?;
        self.blocked -= 1;
        Some(fired)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }
}
