//! Union by full exchange.
//!
//! The acceptor streams its members followed by `UnionDone`. The initiator
//! then streams its own members, reports and waits for the acceptor to close
//! the channel. The acceptor reports once it has the initiator's members.

use std::collections::HashSet;

use tracing::trace;

use super::{OperationContext, Progress, Role};
use crate::element::{Element, ElementHash};
use crate::error::PeerError;
use crate::protocol::{ResultMode, ResultStatus};
use crate::wire::P2pMessage;

#[derive(Debug)]
pub(crate) struct UnionOperation {
    role: Role,
    concluded: bool,
    remote: Vec<Element>,
    remote_hashes: HashSet<ElementHash>,
}

impl UnionOperation {
    pub(crate) fn new(role: Role) -> Self {
        Self {
            role,
            concluded: false,
            remote: Vec::new(),
            remote_hashes: HashSet::new(),
        }
    }

    pub(crate) fn evaluate(
        &mut self,
        _ctx: &mut OperationContext<'_>,
    ) -> Result<Progress, PeerError> {
        Ok(Progress::Continue)
    }

    pub(crate) fn accept(&mut self, ctx: &mut OperationContext<'_>) -> Result<Progress, PeerError> {
        send_members(ctx)?;
        Ok(Progress::Continue)
    }

    pub(crate) fn handle_message(
        &mut self,
        ctx: &mut OperationContext<'_>,
        message: P2pMessage,
    ) -> Result<Progress, PeerError> {
        if self.concluded {
            return Err(PeerError::Unexpected(message.name()));
        }
        match message {
            P2pMessage::UnionElement(element) => {
                let hash = element.hash();
                if self.remote_hashes.insert(hash) {
                    trace!(channel = %ctx.channel, %hash, "received remote element");
                    self.remote.push(element);
                }
                Ok(Progress::Continue)
            }
            P2pMessage::UnionDone => match self.role {
                Role::Initiator => {
                    send_members(ctx)?;
                    self.report(ctx);
                    self.concluded = true;
                    Ok(Progress::Continue)
                }
                Role::Acceptor => {
                    self.report(ctx);
                    Ok(Progress::Finished)
                }
            },
            other => Err(PeerError::Unexpected(other.name())),
        }
    }

    pub(crate) fn is_concluded(&self) -> bool {
        self.concluded
    }

    fn report(&mut self, ctx: &mut OperationContext<'_>) {
        let local: Vec<_> = ctx.snapshot().collect();
        let local_hashes: HashSet<ElementHash> = local.iter().map(|entry| entry.hash).collect();
        let remote = std::mem::take(&mut self.remote);
        let missing_locally = remote
            .into_iter()
            .filter(|element| !local_hashes.contains(&element.hash()));

        match ctx.result_mode {
            ResultMode::Full => {
                for entry in &local {
                    ctx.report(ResultStatus::Ok, entry.element.clone());
                }
                for element in missing_locally {
                    ctx.report(ResultStatus::Ok, element);
                }
            }
            ResultMode::Added => {
                for element in missing_locally {
                    ctx.report(ResultStatus::Ok, element);
                }
            }
            ResultMode::Symmetric => {
                for element in missing_locally {
                    ctx.report(ResultStatus::AddLocal, element);
                }
                let unknown_remotely = local
                    .iter()
                    .filter(|entry| !self.remote_hashes.contains(&entry.hash));
                for entry in unknown_remotely {
                    ctx.report(ResultStatus::AddRemote, entry.element.clone());
                }
            }
            ResultMode::Removed => unreachable!("union never runs with the removed result mode"),
        }
    }
}

fn send_members(ctx: &mut OperationContext<'_>) -> Result<(), PeerError> {
    let members: Vec<_> = ctx.snapshot().map(|entry| entry.element.clone()).collect();
    trace!(channel = %ctx.channel, count = members.len(), "streaming members");
    for element in members {
        ctx.send(&P2pMessage::UnionElement(element))?;
    }
    ctx.send(&P2pMessage::UnionDone)
}
