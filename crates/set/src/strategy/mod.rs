//! Per-operation exchange logic.
//!
//! A strategy sees its set through an [`OperationContext`]: the members at
//! the operation's generation, a way to send frames on the channel and a way
//! to report results to the owning client. It signals completion by
//! returning [`Progress::Finished`]; the service then reports `Done` and
//! tears the channel down.

mod intersection;
mod union;

use std::collections::{HashMap, VecDeque};

use crate::element::{Element, ElementEntry, ElementHash, GenerationRange};
use crate::error::PeerError;
use crate::protocol::{
    ChannelId, ClientId, ClientResponse, OperationType, RequestId, ResultMode, ResultStatus,
};
use crate::service::ServiceEvent;
use crate::wire::P2pMessage;

use self::intersection::IntersectionOperation;
use self::union::UnionOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    /// Evaluated locally and sent the request.
    Initiator,
    /// Accepted a remote request.
    Acceptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Continue,
    /// Exchange complete; the service reports `Done` and closes the channel.
    Finished,
}

pub(crate) struct OperationContext<'a> {
    pub(crate) elements: &'a HashMap<ElementHash, ElementEntry>,
    pub(crate) excluded: &'a [GenerationRange],
    pub(crate) generation: u32,
    pub(crate) channel: ChannelId,
    pub(crate) client: ClientId,
    pub(crate) request_id: RequestId,
    pub(crate) result_mode: ResultMode,
    pub(crate) events: &'a mut VecDeque<ServiceEvent>,
}

impl<'a> OperationContext<'a> {
    /// Members of the set at the operation's generation.
    pub(crate) fn snapshot(&self) -> impl Iterator<Item = &'a ElementEntry> + use<'a> {
        let (generation, excluded) = (self.generation, self.excluded);
        self.elements
            .values()
            .filter(move |entry| entry.is_member(generation, excluded))
    }

    pub(crate) fn send(&mut self, message: &P2pMessage) -> Result<(), PeerError> {
        let frame = message.encode()?;
        self.events.push_back(ServiceEvent::Send {
            channel: self.channel,
            frame,
        });
        Ok(())
    }

    pub(crate) fn report(&mut self, status: ResultStatus, element: Element) {
        self.events.push_back(ServiceEvent::ToClient {
            client: self.client,
            response: ClientResponse::Result {
                request_id: self.request_id,
                status,
                element: Some(element),
            },
        });
    }
}

#[derive(Debug)]
pub(crate) enum StrategyOperation {
    Union(UnionOperation),
    Intersection(IntersectionOperation),
}

impl StrategyOperation {
    pub(crate) fn new(operation: OperationType, role: Role) -> Self {
        match operation {
            OperationType::Union => Self::Union(UnionOperation::new(role)),
            OperationType::Intersection => Self::Intersection(IntersectionOperation::new(role)),
        }
    }

    /// Called on the initiator after the request frame went out.
    pub(crate) fn evaluate(
        &mut self,
        ctx: &mut OperationContext<'_>,
    ) -> Result<Progress, PeerError> {
        match self {
            Self::Union(op) => op.evaluate(ctx),
            Self::Intersection(op) => op.evaluate(ctx),
        }
    }

    /// Called on the acceptor once the client accepted.
    pub(crate) fn accept(&mut self, ctx: &mut OperationContext<'_>) -> Result<Progress, PeerError> {
        match self {
            Self::Union(op) => op.accept(ctx),
            Self::Intersection(op) => op.accept(ctx),
        }
    }

    pub(crate) fn handle_message(
        &mut self,
        ctx: &mut OperationContext<'_>,
        message: P2pMessage,
    ) -> Result<Progress, PeerError> {
        match self {
            Self::Union(op) => op.handle_message(ctx, message),
            Self::Intersection(op) => op.handle_message(ctx, message),
        }
    }

    /// Whether the local side is done and only waits for the peer to close.
    pub(crate) fn is_concluded(&self) -> bool {
        match self {
            Self::Union(op) => op.is_concluded(),
            Self::Intersection(op) => op.is_concluded(),
        }
    }
}
