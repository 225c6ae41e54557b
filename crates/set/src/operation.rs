//! Operation records and their lifecycle states.
//!
//! An operation starts either as [`OperationState::Incoming`] (a remote peer
//! opened a channel) or directly as [`OperationState::Bound`] (a local client
//! evaluated). Incoming operations move through [`IncomingPhase`] until a
//! client accepts, which binds them to that client's set.

use bytes::Bytes;
use libp2p::PeerId;
use trellis_tasks::Timer;

use crate::protocol::{AppId, ChannelId, ClientId, OperationType, RequestId, ResultMode};
use crate::strategy::StrategyOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct OperationId(pub(crate) u64);

/// Parameters announced in an operation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OperationSpec {
    pub(crate) operation: OperationType,
    pub(crate) app_id: AppId,
    pub(crate) salt: u32,
    pub(crate) remote_element_count: u64,
    pub(crate) context: Option<Bytes>,
}

#[derive(Debug)]
pub(crate) enum IncomingPhase {
    /// Channel open, request not yet received.
    AwaitingRequest,
    /// No listener matched so far.
    Unclaimed(OperationSpec),
    /// Forwarded to `listener`, waiting for accept or reject.
    Suggested {
        spec: OperationSpec,
        suggest_id: u32,
        listener: ClientId,
    },
}

#[derive(Debug)]
pub(crate) struct IncomingOperation {
    pub(crate) phase: IncomingPhase,
    /// Running until a listener is found.
    pub(crate) timeout: Option<Timer>,
}

#[derive(Debug)]
pub(crate) struct BoundOperation {
    pub(crate) spec: OperationSpec,
    /// Owner of the set the operation runs on.
    pub(crate) set: ClientId,
    pub(crate) request_id: RequestId,
    pub(crate) result_mode: ResultMode,
    /// Generation of the set the operation observes.
    pub(crate) generation: u32,
    pub(crate) strategy: StrategyOperation,
}

#[derive(Debug)]
pub(crate) enum OperationState {
    Incoming(IncomingOperation),
    Bound(BoundOperation),
}

#[derive(Debug)]
pub(crate) struct Operation {
    pub(crate) channel: ChannelId,
    pub(crate) peer: PeerId,
    pub(crate) state: OperationState,
}

impl Operation {
    pub(crate) fn unclaimed_spec(&self) -> Option<&OperationSpec> {
        match &self.state {
            OperationState::Incoming(IncomingOperation {
                phase: IncomingPhase::Unclaimed(spec),
                ..
            }) => Some(spec),
            _ => None,
        }
    }

    /// Parameters of the incoming request suggested under `accept_id`.
    pub(crate) fn suggested(&self, accept_id: u32) -> Option<&OperationSpec> {
        match &self.state {
            OperationState::Incoming(IncomingOperation {
                phase: IncomingPhase::Suggested { spec, suggest_id, .. },
                ..
            }) if *suggest_id == accept_id => Some(spec),
            _ => None,
        }
    }

    pub(crate) fn bound(&self) -> Option<&BoundOperation> {
        match &self.state {
            OperationState::Bound(bound) => Some(bound),
            OperationState::Incoming(_) => None,
        }
    }
}
