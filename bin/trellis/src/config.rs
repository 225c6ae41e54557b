//! Daemon configuration file.

use std::path::Path;

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use trellis_net_addresses::AddressTableConfig;
use trellis_set::SetServiceConfig;

/// Top-level configuration, one table per service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TrellisConfig {
    #[serde(default)]
    pub(crate) addresses: AddressTableConfig,

    #[serde(default)]
    pub(crate) set: SetServiceConfig,
}

impl TrellisConfig {
    /// Load from `path`, or defaults if no path was given.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).wrap_err_with(|| format!("parsing config {}", path.display()))
    }
}
