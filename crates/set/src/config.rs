//! Set service configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_incoming_timeout_secs() -> u64 {
    60
}

fn default_max_context_size() -> usize {
    1024
}

/// Set service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetServiceConfig {
    /// How long an incoming request may wait for a listener to claim it.
    #[serde(default = "default_incoming_timeout_secs")]
    pub incoming_timeout_secs: u64,

    /// Largest application context blob accepted with an operation request.
    #[serde(default = "default_max_context_size")]
    pub max_context_size: usize,
}

impl Default for SetServiceConfig {
    fn default() -> Self {
        Self {
            incoming_timeout_secs: default_incoming_timeout_secs(),
            max_context_size: default_max_context_size(),
        }
    }
}

impl SetServiceConfig {
    pub fn incoming_timeout(&self) -> Duration {
        Duration::from_secs(self.incoming_timeout_secs)
    }
}
