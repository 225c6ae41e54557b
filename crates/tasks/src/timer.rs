//! Deadline-ordered timers with single ownership of each handle.
//!
//! A [`Timer`] is handed to exactly one owner when scheduled. It is neither
//! `Clone` nor `Copy`, and [`TimerQueue::cancel`] consumes it, so a timer can
//! be cancelled at most once. Once a timer fires the queue forgets it; the
//! owner matches the reported [`TimerId`] against the handle it holds and
//! drops the handle.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::metrics::TimerMetrics;

/// Identifier of a scheduled timer. Never reused within one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Owned handle to a pending timer.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a dropped handle can no longer cancel its timer"]
pub struct Timer {
    id: TimerId,
    deadline: Instant,
}

impl Timer {
    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether `id` (as reported by [`TimerQueue::pop_expired`]) refers to this timer.
    pub fn is(&self, id: TimerId) -> bool {
        self.id == id
    }
}

/// A timer that reached its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired<K> {
    pub id: TimerId,
    pub key: K,
}

/// Timers keyed by deadline, carrying a caller-defined key.
pub struct TimerQueue<K> {
    entries: BTreeMap<(Instant, TimerId), K>,
    next_id: u64,
    metrics: TimerMetrics,
}

impl<K: fmt::Debug> fmt::Debug for TimerQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("entries", &self.entries)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl<K> TimerQueue<K> {
    /// Create an empty queue. `name` labels the queue's metrics.
    pub fn new(name: &'static str) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 0,
            metrics: TimerMetrics::new(name),
        }
    }

    /// Schedule `key` to expire `delay` from now.
    pub fn schedule(&mut self, delay: Duration, key: K) -> Timer {
        self.schedule_at(Instant::now() + delay, key)
    }

    pub fn schedule_at(&mut self, deadline: Instant, key: K) -> Timer {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.insert((deadline, id), key);
        self.metrics.on_scheduled(self.entries.len());
        trace!(%id, "timer scheduled");
        Timer { id, deadline }
    }

    /// Cancel a pending timer, returning its key.
    ///
    /// Returns `None` only if the timer already fired and the owner did not
    /// notice, which is a bug in the owner.
    pub fn cancel(&mut self, timer: Timer) -> Option<K> {
        let key = self.entries.remove(&(timer.deadline, timer.id));
        if key.is_some() {
            self.metrics.on_cancelled(self.entries.len());
            trace!(id = %timer.id, "timer cancelled");
        }
        key
    }

    /// Remove and return the earliest timer whose deadline is at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<Expired<K>> {
        let entry = self.entries.first_entry()?;
        if entry.key().0 > now {
            return None;
        }
        let ((_, id), key) = entry.remove_entry();
        self.metrics.on_fired(self.entries.len());
        trace!(%id, "timer fired");
        Some(Expired { id, key })
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sleep until `deadline`, or forever if there is none.
///
/// Intended for `tokio::select!` loops that re-evaluate the deadline on
/// every iteration.
pub async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pop_in_deadline_order() {
        let mut queue = TimerQueue::new("test");
        let _late = queue.schedule(Duration::from_secs(10), "late");
        let _early = queue.schedule(Duration::from_secs(1), "early");

        assert!(queue.pop_expired(Instant::now()).is_none());

        tokio::time::advance(Duration::from_secs(11)).await;
        let now = Instant::now();
        assert_eq!(queue.pop_expired(now).map(|e| e.key), Some("early"));
        assert_eq!(queue.pop_expired(now).map(|e| e.key), Some("late"));
        assert!(queue.pop_expired(now).is_none());
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let mut queue = TimerQueue::new("test");
        let timer = queue.schedule(Duration::from_secs(1), 7u32);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.cancel(timer), Some(7));
        assert!(queue.is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(queue.pop_expired(Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_id_matches_handle() {
        let mut queue = TimerQueue::new("test");
        let first = queue.schedule(Duration::from_millis(5), ());
        let second = queue.schedule(Duration::from_millis(5), ());
        assert_ne!(first.id(), second.id());

        tokio::time::advance(Duration::from_millis(5)).await;
        let fired = queue.pop_expired(Instant::now()).unwrap();
        assert!(first.is(fired.id));
        assert!(!second.is(fired.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_next_deadline() {
        let mut queue = TimerQueue::new("test");
        let _timer = queue.schedule(Duration::from_secs(30), ());
        let start = Instant::now();

        sleep_until(queue.next_deadline()).await;

        assert!(Instant::now() - start >= Duration::from_secs(30));
        assert!(queue.pop_expired(Instant::now()).is_some());
    }
}
