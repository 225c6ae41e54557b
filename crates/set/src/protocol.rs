//! Identifiers and the local client protocol.

use std::fmt;

use alloy_primitives::B256;
use bytes::Bytes;
use libp2p::PeerId;
use serde::{Deserialize, Serialize};

use crate::element::Element;

/// Application identifier a listener registers for.
pub type AppId = B256;

/// Connection of a local client, assigned by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Peer-to-peer channel carrying one operation, assigned by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}

/// Client-chosen identifier of an operation, echoed in results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Union,
    Intersection,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Union => "union",
            Self::Intersection => "intersection",
        }
    }

    pub fn supports(&self, mode: ResultMode) -> bool {
        match self {
            Self::Union => matches!(
                mode,
                ResultMode::Full | ResultMode::Added | ResultMode::Symmetric
            ),
            Self::Intersection => matches!(mode, ResultMode::Full | ResultMode::Removed),
        }
    }
}

/// Which elements a client wants reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultMode {
    /// Every element of the resulting set.
    Full,
    /// Union only: elements the local set lacked.
    Added,
    /// Union only: elements missing on either side, tagged by side.
    Symmetric,
    /// Intersection only: local elements not in the intersection.
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultStatus {
    Ok,
    /// The local side lacked the element.
    AddLocal,
    /// The remote side lacked the element.
    AddRemote,
    Failure,
    Done,
}

/// Commands of a local client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    CreateSet {
        operation: OperationType,
    },
    Listen {
        operation: OperationType,
        app_id: AppId,
    },
    Evaluate {
        target_peer: PeerId,
        app_id: AppId,
        result_mode: ResultMode,
        request_id: RequestId,
        context: Option<Bytes>,
    },
    Accept {
        accept_id: u32,
        request_id: RequestId,
        result_mode: ResultMode,
    },
    Reject {
        accept_id: u32,
    },
    Add(Element),
    Remove(Element),
    Iterate,
    IterAck {
        iteration_id: u16,
        send_more: bool,
    },
    Cancel {
        request_id: RequestId,
    },
    CopyLazyPrepare,
    CopyLazyConnect {
        cookie: u32,
    },
}

/// Messages sent to a local client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientResponse {
    /// A remote peer wants to run an operation the client listens for.
    Request {
        accept_id: u32,
        peer: PeerId,
        context: Option<Bytes>,
    },
    Result {
        request_id: RequestId,
        status: ResultStatus,
        element: Option<Element>,
    },
    IterElement {
        iteration_id: u16,
        element: Element,
    },
    IterDone,
    CopyLazyResponse {
        cookie: u32,
    },
}
