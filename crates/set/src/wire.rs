//! Frames exchanged between peers on an operation channel.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::element::{Element, ElementHash};
use crate::error::CodecError;
use crate::protocol::{AppId, OperationType};

/// A peer-to-peer frame, encoded with postcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum P2pMessage {
    /// First frame on a channel, sent by the initiator.
    OperationRequest {
        operation: OperationType,
        app_id: AppId,
        salt: u32,
        element_count: u64,
        context: Option<Bytes>,
    },
    UnionElement(Element),
    /// The sender has streamed all of its elements.
    UnionDone,
    IntersectionHashes(Vec<ElementHash>),
}

impl P2pMessage {
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        postcard::to_allocvec(self)
            .map(Bytes::from)
            .map_err(CodecError::Encode)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        postcard::from_bytes(frame).map_err(CodecError::Decode)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::OperationRequest { .. } => "operation request",
            Self::UnionElement(_) => "union element",
            Self::UnionDone => "union done",
            Self::IntersectionHashes(_) => "intersection hashes",
        }
    }
}
