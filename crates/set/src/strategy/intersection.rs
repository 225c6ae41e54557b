//! Intersection by hash exchange.
//!
//! The acceptor sends the hashes of its members. The initiator answers with
//! its own, reports and waits for the channel to close; the acceptor reports
//! on receipt and finishes.

use std::collections::HashSet;

use super::{OperationContext, Progress, Role};
use crate::element::ElementHash;
use crate::error::PeerError;
use crate::protocol::{ResultMode, ResultStatus};
use crate::wire::P2pMessage;

#[derive(Debug)]
pub(crate) struct IntersectionOperation {
    role: Role,
    concluded: bool,
}

impl IntersectionOperation {
    pub(crate) fn new(role: Role) -> Self {
        Self {
            role,
            concluded: false,
        }
    }

    pub(crate) fn evaluate(
        &mut self,
        _ctx: &mut OperationContext<'_>,
    ) -> Result<Progress, PeerError> {
        Ok(Progress::Continue)
    }

    pub(crate) fn accept(&mut self, ctx: &mut OperationContext<'_>) -> Result<Progress, PeerError> {
        let hashes = local_hashes(ctx);
        ctx.send(&P2pMessage::IntersectionHashes(hashes))?;
        Ok(Progress::Continue)
    }

    pub(crate) fn handle_message(
        &mut self,
        ctx: &mut OperationContext<'_>,
        message: P2pMessage,
    ) -> Result<Progress, PeerError> {
        let remote = match message {
            P2pMessage::IntersectionHashes(remote) => remote,
            other => return Err(PeerError::Unexpected(other.name())),
        };
        if self.concluded {
            return Err(PeerError::Unexpected("repeated intersection hashes"));
        }
        let remote: HashSet<ElementHash> = remote.into_iter().collect();
        match self.role {
            Role::Initiator => {
                let hashes = local_hashes(ctx);
                ctx.send(&P2pMessage::IntersectionHashes(hashes))?;
                report(ctx, &remote);
                self.concluded = true;
                Ok(Progress::Continue)
            }
            Role::Acceptor => {
                report(ctx, &remote);
                Ok(Progress::Finished)
            }
        }
    }

    pub(crate) fn is_concluded(&self) -> bool {
        self.concluded
    }
}

fn local_hashes(ctx: &OperationContext<'_>) -> Vec<ElementHash> {
    ctx.snapshot().map(|entry| entry.hash).collect()
}

fn report(ctx: &mut OperationContext<'_>, remote: &HashSet<ElementHash>) {
    let keep_shared = match ctx.result_mode {
        ResultMode::Full => true,
        ResultMode::Removed => false,
        mode => unreachable!("intersection never runs with {mode:?}"),
    };
    let selected: Vec<_> = ctx
        .snapshot()
        .filter(|entry| remote.contains(&entry.hash) == keep_shared)
        .map(|entry| entry.element.clone())
        .collect();
    for element in selected {
        ctx.report(ResultStatus::Ok, element);
    }
}
