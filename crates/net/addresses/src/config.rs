//! Address table configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;

fn default_initial_backoff_ms() -> u64 {
    1
}

fn default_max_backoff_secs() -> u64 {
    15 * 60
}

fn default_event_channel_capacity() -> usize {
    256
}

/// Address table configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressTableConfig {
    /// Smallest backoff doubled on the first failure.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on how long an address stays blocked.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Broadcast channel capacity for address events.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for AddressTableConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl AddressTableConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_secs(self.max_backoff_secs),
        )
    }
}
