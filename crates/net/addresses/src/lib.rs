//! Per-peer address and session tracking.
//!
//! [`AddressTable`] reconciles what transports know about a peer's addresses
//! with what a [`Recommender`] is allowed to suggest. Addresses that fail are
//! blocked with exponential backoff and come back once their unblock timer
//! fires (see [`AddressTable::unblock_expired`]).

mod blocking;
pub mod address;
pub mod backoff;
pub mod config;
pub mod events;
mod metrics;
mod record;
pub mod table;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_utils;

pub use address::{AddressProperties, NetworkScope, SessionId, TransportAddress};
pub use backoff::BackoffPolicy;
pub use config::AddressTableConfig;
pub use events::{AddressEvent, EventEmitter};
pub use record::AddressSnapshot;
pub use table::{AddressStats, AddressTable};
pub use traits::{PropertyManipulator, Recommender};
