//! Client, peer and codec errors.

use crate::protocol::{OperationType, ResultMode};

/// A local client broke the protocol. The client gets disconnected.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("client has no set")]
    NoSet,
    #[error("client already owns a set")]
    SetExists,
    #[error("client already listens")]
    ListenerExists,
    #[error("unknown lazy copy cookie {0}")]
    UnknownCookie(u32),
    #[error("no incoming request with id {0}")]
    UnknownRequest(u32),
    #[error("an iteration is already running")]
    IterationActive,
    #[error("acknowledgement without a running iteration")]
    NoIteration,
    #[error("context of {size} bytes exceeds the limit of {max}")]
    ContextTooLarge { size: usize, max: usize },
    #[error("result mode {mode:?} is not supported by {operation:?}")]
    UnsupportedResultMode {
        operation: OperationType,
        mode: ResultMode,
    },
}

/// A remote peer broke the protocol. Its channel is torn down.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("unexpected {0} message")]
    Unexpected(&'static str),
    #[error("duplicate operation request")]
    DuplicateRequest,
    #[error("context of {size} bytes exceeds the limit of {max}")]
    ContextTooLarge { size: usize, max: usize },
}

/// P2P frame encoding error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode: {0}")]
    Encode(#[source] postcard::Error),
    #[error("decode: {0}")]
    Decode(#[source] postcard::Error),
}
