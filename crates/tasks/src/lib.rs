//! Timers for single-threaded, event-loop driven services.

mod metrics;
mod timer;

pub use timer::{Expired, Timer, TimerId, TimerQueue, sleep_until};
