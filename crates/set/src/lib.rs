//! Two-party set reconciliation.
//!
//! Clients own one set each and may register one listener.
//! [`SetService`] matches operation requests arriving from remote peers
//! against listeners, binds accepted operations to sets and drives the
//! union or intersection exchange over a channel. All transport I/O is left
//! to the caller: the service consumes [`ClientRequest`]s and channel frames
//! and yields [`ServiceEvent`]s.
//!
//! Sets share their content after a lazy copy. Mutations are versioned by
//! generation instead of copied, and each set hides the generations written
//! by its siblings through exclusion ranges.

mod config;
mod content;
mod element;
mod error;
mod listener;
mod metrics;
mod operation;
mod protocol;
mod service;
mod set;
mod strategy;
mod wire;

pub use config::SetServiceConfig;
pub use element::{Element, ElementHash};
pub use error::{ClientError, CodecError, PeerError};
pub use protocol::{
    AppId, ChannelId, ClientId, ClientRequest, ClientResponse, OperationType, RequestId,
    ResultMode, ResultStatus,
};
pub use service::{ServiceEvent, SetService};
pub use wire::P2pMessage;
