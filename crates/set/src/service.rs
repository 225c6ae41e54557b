//! The set service: client requests, operation lifecycle and channel plumbing.

use std::collections::{HashMap, VecDeque};
use std::mem;

use bytes::Bytes;
use libp2p::PeerId;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use trellis_tasks::TimerQueue;

use crate::config::SetServiceConfig;
use crate::content::{ContentArena, ContentId, Mutation, PendingMutation};
use crate::element::{Element, GenerationRange};
use crate::error::{ClientError, PeerError};
use crate::listener::Listener;
use crate::metrics::SetMetrics;
use crate::operation::{
    BoundOperation, IncomingOperation, IncomingPhase, Operation, OperationId, OperationSpec,
    OperationState,
};
use crate::protocol::{
    AppId, ChannelId, ClientId, ClientRequest, ClientResponse, OperationType, RequestId,
    ResultMode, ResultStatus,
};
use crate::set::Set;
use crate::strategy::{OperationContext, Progress, Role, StrategyOperation};
use crate::wire::P2pMessage;

/// Output of the service, consumed by the embedding transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    ToClient {
        client: ClientId,
        response: ClientResponse,
    },
    /// Open a channel to `peer` and report frames on it as `channel`.
    OpenChannel { channel: ChannelId, peer: PeerId },
    Send { channel: ChannelId, frame: Bytes },
    CloseChannel { channel: ChannelId },
    /// The client broke the protocol; drop its connection.
    DisconnectClient { client: ClientId },
}

/// What happens to the channel when an operation is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    Close,
    /// The peer already closed it.
    Gone,
}

#[derive(Debug)]
struct LazyCopyRequest {
    cookie: u32,
    source: ClientId,
}

/// Set reconciliation service.
///
/// Single-threaded: every entry point runs to completion and queues its
/// output, which the caller drains with [`SetService::poll_event`].
#[derive(Debug)]
pub struct SetService {
    local_peer: PeerId,
    config: SetServiceConfig,
    sets: HashMap<ClientId, Set>,
    /// In registration order; the first match claims a request.
    listeners: Vec<Listener>,
    contents: ContentArena,
    operations: HashMap<OperationId, Operation>,
    channels: HashMap<ChannelId, OperationId>,
    /// Operations not yet bound to a set, oldest first.
    incoming: Vec<OperationId>,
    lazy_copies: Vec<LazyCopyRequest>,
    timeouts: TimerQueue<OperationId>,
    next_operation: u64,
    next_channel: u64,
    next_cookie: u32,
    last_suggest_id: u32,
    events: VecDeque<ServiceEvent>,
    metrics: SetMetrics,
}

impl SetService {
    pub fn new(local_peer: PeerId, config: SetServiceConfig) -> Self {
        Self {
            local_peer,
            config,
            sets: HashMap::new(),
            listeners: Vec::new(),
            contents: ContentArena::default(),
            operations: HashMap::new(),
            channels: HashMap::new(),
            incoming: Vec::new(),
            lazy_copies: Vec::new(),
            timeouts: TimerQueue::new("set_incoming"),
            next_operation: 0,
            next_channel: 0,
            next_cookie: 1,
            last_suggest_id: 0,
            events: VecDeque::new(),
            metrics: SetMetrics::default(),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn poll_event(&mut self) -> Option<ServiceEvent> {
        self.events.pop_front()
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Handle one request of a local client.
    ///
    /// A returned error means the client broke the protocol: its set and
    /// listener are destroyed and a [`ServiceEvent::DisconnectClient`] is
    /// queued.
    pub fn handle_client(
        &mut self,
        client: ClientId,
        request: ClientRequest,
    ) -> Result<(), ClientError> {
        let result = match request {
            ClientRequest::CreateSet { operation } => self.create_set(client, operation),
            ClientRequest::Listen { operation, app_id } => self.listen(client, operation, app_id),
            ClientRequest::Evaluate {
                target_peer,
                app_id,
                result_mode,
                request_id,
                context,
            } => self.evaluate(client, target_peer, app_id, result_mode, request_id, context),
            ClientRequest::Accept {
                accept_id,
                request_id,
                result_mode,
            } => self.accept(client, accept_id, request_id, result_mode),
            ClientRequest::Reject { accept_id } => self.reject(client, accept_id),
            ClientRequest::Add(element) => self.mutate(client, Mutation::Add(element)),
            ClientRequest::Remove(element) => self.mutate(client, Mutation::Remove(element)),
            ClientRequest::Iterate => self.iterate(client),
            ClientRequest::IterAck {
                iteration_id,
                send_more,
            } => self.iteration_ack(client, iteration_id, send_more),
            ClientRequest::Cancel { request_id } => self.cancel(client, request_id),
            ClientRequest::CopyLazyPrepare => self.copy_lazy_prepare(client),
            ClientRequest::CopyLazyConnect { cookie } => self.copy_lazy_connect(client, cookie),
        };
        if let Err(error) = &result {
            warn!(%client, %error, "client protocol violation, disconnecting");
            self.client_disconnected(client);
            self.events.push_back(ServiceEvent::DisconnectClient { client });
        }
        result
    }

    /// Release everything a client owned.
    pub fn client_disconnected(&mut self, client: ClientId) {
        if let Some(index) = self.listeners.iter().position(|l| l.client == client) {
            self.listeners.remove(index);
            debug!(%client, "listener removed");
            self.reclaim_suggested(client);
        }
        self.destroy_set(client);
    }

    /// A remote peer opened a channel. The request must follow before the
    /// incoming timeout elapses.
    pub fn inbound_channel(&mut self, peer: PeerId) -> ChannelId {
        let channel = self.allocate_channel();
        let id = self.allocate_operation();
        let timeout = self.timeouts.schedule(self.config.incoming_timeout(), id);
        self.operations.insert(
            id,
            Operation {
                channel,
                peer,
                state: OperationState::Incoming(IncomingOperation {
                    phase: IncomingPhase::AwaitingRequest,
                    timeout: Some(timeout),
                }),
            },
        );
        self.channels.insert(channel, id);
        self.incoming.push(id);
        debug!(%peer, %channel, "incoming channel");
        channel
    }

    pub fn handle_channel_message(&mut self, channel: ChannelId, frame: &[u8]) {
        let Some(&id) = self.channels.get(&channel) else {
            debug!(%channel, "frame on unknown channel");
            return;
        };
        let message = match P2pMessage::decode(frame) {
            Ok(message) => message,
            Err(error) => {
                self.peer_violation(id, error.into());
                return;
            }
        };
        let Some(op) = self.operations.get(&id) else {
            return;
        };
        if op.bound().is_some() {
            self.drive(id, |strategy, ctx| strategy.handle_message(ctx, message));
        } else if let Err(error) = self.handle_request(id, message) {
            self.peer_violation(id, error);
        }
    }

    /// The peer closed `channel`, or the transport lost it.
    pub fn channel_ended(&mut self, channel: ChannelId) {
        let Some(&id) = self.channels.get(&channel) else {
            trace!(%channel, "end of unknown channel");
            return;
        };
        let Some(op) = self.operations.get(&id) else {
            return;
        };
        let peer = op.peer;
        match op.bound() {
            Some(bound) => {
                let (client, request_id) = (bound.set, bound.request_id);
                if bound.strategy.is_concluded() {
                    debug!(%channel, %peer, "peer closed finished operation");
                    self.report(client, request_id, ResultStatus::Done, None);
                } else {
                    warn!(%channel, %peer, "peer disconnected prematurely");
                    self.report(client, request_id, ResultStatus::Failure, None);
                }
            }
            None => debug!(%channel, %peer, "incoming channel closed by peer"),
        }
        self.destroy_operation(id, Teardown::Gone, true);
    }

    /// Destroy incoming operations whose timeout elapsed. Returns how many.
    pub fn expire_timeouts(&mut self) -> usize {
        let now = Instant::now();
        let mut expired = 0;
        while let Some(fired) = self.timeouts.pop_expired(now) {
            let Some(op) = self.operations.get_mut(&fired.key) else {
                continue;
            };
            let OperationState::Incoming(incoming) = &mut op.state else {
                continue;
            };
            match incoming.timeout.take() {
                Some(timer) if timer.is(fired.id) => {}
                other => {
                    incoming.timeout = other;
                    continue;
                }
            }
            debug!(peer = %op.peer, channel = %op.channel, "incoming operation timed out");
            self.destroy_operation(fired.key, Teardown::Close, false);
            expired += 1;
        }
        expired
    }

    pub fn next_timeout(&self) -> Option<Instant> {
        self.timeouts.next_deadline()
    }

    /// Tear down every operation, listener and set.
    pub fn shutdown(&mut self) {
        for id in mem::take(&mut self.incoming) {
            self.destroy_operation(id, Teardown::Close, false);
        }
        self.listeners.clear();
        let clients: Vec<ClientId> = self.sets.keys().copied().collect();
        for client in clients {
            self.destroy_set(client);
        }
        info!(peer = %self.local_peer, "set service shut down");
    }

    fn create_set(
        &mut self,
        client: ClientId,
        operation: OperationType,
    ) -> Result<(), ClientError> {
        if self.sets.contains_key(&client) {
            return Err(ClientError::SetExists);
        }
        let content = self.contents.create();
        self.sets.insert(client, Set::new(operation, content));
        debug!(%client, operation = operation.as_str(), "set created");
        Ok(())
    }

    fn listen(
        &mut self,
        client: ClientId,
        operation: OperationType,
        app_id: AppId,
    ) -> Result<(), ClientError> {
        if self.listeners.iter().any(|l| l.client == client) {
            return Err(ClientError::ListenerExists);
        }
        let listener = Listener {
            client,
            operation,
            app_id,
        };
        let claimable: Vec<OperationId> = self
            .incoming
            .iter()
            .copied()
            .filter(|id| {
                self.operations
                    .get(id)
                    .and_then(Operation::unclaimed_spec)
                    .is_some_and(|spec| listener.matches(spec))
            })
            .collect();
        self.listeners.push(listener);
        debug!(
            %client,
            operation = operation.as_str(),
            %app_id,
            waiting = claimable.len(),
            "listener registered"
        );
        for id in claimable {
            self.suggest(id, client);
        }
        Ok(())
    }

    fn evaluate(
        &mut self,
        client: ClientId,
        target_peer: PeerId,
        app_id: AppId,
        result_mode: ResultMode,
        request_id: RequestId,
        context: Option<Bytes>,
    ) -> Result<(), ClientError> {
        let set = self.sets.get(&client).ok_or(ClientError::NoSet)?;
        let operation = set.operation;
        if !operation.supports(result_mode) {
            return Err(ClientError::UnsupportedResultMode {
                operation,
                mode: result_mode,
            });
        }
        if let Some(context) = &context
            && context.len() > self.config.max_context_size
        {
            return Err(ClientError::ContextTooLarge {
                size: context.len(),
                max: self.config.max_context_size,
            });
        }

        let id = self.allocate_operation();
        let channel = self.allocate_channel();
        let set = self.sets.get_mut(&client).ok_or(ClientError::NoSet)?;
        let generation = set.current_generation;
        let element_count = set.state.element_count;
        let content = set.content;
        set.advance_generation(&mut self.contents[content]);
        set.operations.push(id);

        let spec = OperationSpec {
            operation,
            app_id,
            salt: rand::random(),
            remote_element_count: 0,
            context,
        };
        let request = P2pMessage::OperationRequest {
            operation,
            app_id,
            salt: spec.salt,
            element_count,
            context: spec.context.clone(),
        };
        self.operations.insert(
            id,
            Operation {
                channel,
                peer: target_peer,
                state: OperationState::Bound(BoundOperation {
                    spec,
                    set: client,
                    request_id,
                    result_mode,
                    generation,
                    strategy: StrategyOperation::new(operation, Role::Initiator),
                }),
            },
        );
        self.channels.insert(channel, id);
        self.metrics.initiated(operation);
        info!(
            %client,
            peer = %target_peer,
            %channel,
            operation = operation.as_str(),
            generation,
            "evaluating set operation"
        );
        self.events.push_back(ServiceEvent::OpenChannel {
            channel,
            peer: target_peer,
        });
        self.drive(id, |strategy, ctx| {
            ctx.send(&request)?;
            strategy.evaluate(ctx)
        });
        Ok(())
    }

    fn accept(
        &mut self,
        client: ClientId,
        accept_id: u32,
        request_id: RequestId,
        result_mode: ResultMode,
    ) -> Result<(), ClientError> {
        let set = self.sets.get(&client).ok_or(ClientError::NoSet)?;
        let operation = set.operation;
        if !operation.supports(result_mode) {
            return Err(ClientError::UnsupportedResultMode {
                operation,
                mode: result_mode,
            });
        }
        let Some(id) = self.find_suggested(accept_id) else {
            debug!(%client, accept_id, "accepted request is gone");
            self.report(client, request_id, ResultStatus::Failure, None);
            return Ok(());
        };
        let requested = self
            .operations
            .get(&id)
            .and_then(|op| op.suggested(accept_id))
            .map(|spec| spec.operation);
        if requested != Some(operation) {
            warn!(%client, accept_id, "request type does not match the accepting set");
            self.report(client, request_id, ResultStatus::Failure, None);
            self.destroy_operation(id, Teardown::Close, false);
            return Ok(());
        }

        let Some(Operation {
            channel,
            peer,
            state,
        }) = self.operations.remove(&id)
        else {
            return Ok(());
        };
        let OperationState::Incoming(IncomingOperation {
            phase: IncomingPhase::Suggested { spec, .. },
            ..
        }) = state
        else {
            unreachable!("suggested operation left the incoming state");
        };
        self.incoming.retain(|incoming| *incoming != id);

        let set = self.sets.get_mut(&client).ok_or(ClientError::NoSet)?;
        let generation = set.current_generation;
        let content = set.content;
        set.advance_generation(&mut self.contents[content]);
        set.operations.push(id);

        info!(
            %client,
            %peer,
            %channel,
            operation = operation.as_str(),
            generation,
            remote_elements = spec.remote_element_count,
            "accepted set operation"
        );
        self.operations.insert(
            id,
            Operation {
                channel,
                peer,
                state: OperationState::Bound(BoundOperation {
                    spec,
                    set: client,
                    request_id,
                    result_mode,
                    generation,
                    strategy: StrategyOperation::new(operation, Role::Acceptor),
                }),
            },
        );
        self.metrics.accepted(operation);
        self.drive(id, |strategy, ctx| strategy.accept(ctx));
        Ok(())
    }

    fn reject(&mut self, client: ClientId, accept_id: u32) -> Result<(), ClientError> {
        let id = self
            .find_suggested(accept_id)
            .ok_or(ClientError::UnknownRequest(accept_id))?;
        debug!(%client, accept_id, "request rejected");
        self.destroy_operation(id, Teardown::Close, false);
        Ok(())
    }

    fn cancel(&mut self, client: ClientId, request_id: RequestId) -> Result<(), ClientError> {
        let set = self.sets.get(&client).ok_or(ClientError::NoSet)?;
        let found = set.operations.iter().copied().find(|id| {
            self.operations
                .get(id)
                .and_then(Operation::bound)
                .is_some_and(|bound| bound.request_id == request_id)
        });
        match found {
            Some(id) => {
                debug!(%client, request_id = request_id.0, "operation cancelled");
                self.destroy_operation(id, Teardown::Close, true);
            }
            None => debug!(%client, request_id = request_id.0, "cancel of finished operation"),
        }
        Ok(())
    }

    fn mutate(&mut self, client: ClientId, mutation: Mutation) -> Result<(), ClientError> {
        let set = self.sets.get_mut(&client).ok_or(ClientError::NoSet)?;
        let content = &mut self.contents[set.content];
        if content.iterator_count > 0 {
            trace!(%client, "iteration running, mutation queued");
            content.pending.push_back(PendingMutation {
                set: client,
                mutation,
            });
            return Ok(());
        }
        set.apply(content, mutation);
        Ok(())
    }

    fn iterate(&mut self, client: ClientId) -> Result<(), ClientError> {
        let set = self.sets.get_mut(&client).ok_or(ClientError::NoSet)?;
        if set.iteration.is_some() {
            return Err(ClientError::IterationActive);
        }
        let content = set.content;
        set.start_iteration(&mut self.contents[content]);
        debug!(%client, iteration_id = set.iteration_id, "iteration started");
        self.send_next_element(client);
        Ok(())
    }

    fn iteration_ack(
        &mut self,
        client: ClientId,
        iteration_id: u16,
        send_more: bool,
    ) -> Result<(), ClientError> {
        let set = self.sets.get_mut(&client).ok_or(ClientError::NoSet)?;
        if set.iteration.is_none() {
            return Err(ClientError::NoIteration);
        }
        if set.iteration_id != iteration_id {
            debug!(%client, iteration_id, current = set.iteration_id, "stale iteration ack");
            return Ok(());
        }
        if send_more {
            self.send_next_element(client);
        } else {
            let content = set.content;
            set.end_iteration(&mut self.contents[content]);
            debug!(%client, "iteration stopped by client");
            self.flush_pending(content);
        }
        Ok(())
    }

    fn copy_lazy_prepare(&mut self, client: ClientId) -> Result<(), ClientError> {
        if !self.sets.contains_key(&client) {
            return Err(ClientError::NoSet);
        }
        let cookie = self.next_cookie;
        self.next_cookie = self.next_cookie.wrapping_add(1).max(1);
        self.lazy_copies.push(LazyCopyRequest {
            cookie,
            source: client,
        });
        trace!(%client, cookie, "lazy copy prepared");
        self.events.push_back(ServiceEvent::ToClient {
            client,
            response: ClientResponse::CopyLazyResponse { cookie },
        });
        Ok(())
    }

    fn copy_lazy_connect(&mut self, client: ClientId, cookie: u32) -> Result<(), ClientError> {
        if self.sets.contains_key(&client) {
            return Err(ClientError::SetExists);
        }
        let index = self
            .lazy_copies
            .iter()
            .position(|request| request.cookie == cookie)
            .ok_or(ClientError::UnknownCookie(cookie))?;
        let request = self.lazy_copies.remove(index);
        let source = self
            .sets
            .get_mut(&request.source)
            .ok_or(ClientError::UnknownCookie(cookie))?;

        let mut copy = source.lazy_copy();
        let content = &mut self.contents[source.content];
        content.refcount += 1;
        copy.advance_generation(content);
        source.advance_generation(content);
        debug!(
            %client,
            source = %request.source,
            copy_generation = copy.current_generation,
            source_generation = source.current_generation,
            "lazy copy connected"
        );
        self.sets.insert(client, copy);
        Ok(())
    }

    fn send_next_element(&mut self, client: ClientId) {
        let Some(set) = self.sets.get_mut(&client) else {
            return;
        };
        let content_id = set.content;
        let content = &mut self.contents[content_id];
        if let Some(element) = set.next_element(content) {
            self.events.push_back(ServiceEvent::ToClient {
                client,
                response: ClientResponse::IterElement {
                    iteration_id: set.iteration_id,
                    element,
                },
            });
            return;
        }
        set.end_iteration(content);
        debug!(%client, "iteration done");
        self.flush_pending(content_id);
        self.events.push_back(ServiceEvent::ToClient {
            client,
            response: ClientResponse::IterDone,
        });
    }

    /// Apply queued mutations once no iteration runs over the content.
    fn flush_pending(&mut self, content_id: ContentId) {
        let Some(content) = self.contents.get_mut(content_id) else {
            return;
        };
        if content.iterator_count > 0 {
            return;
        }
        while let Some(pending) = content.pending.pop_front() {
            match self.sets.get_mut(&pending.set) {
                Some(set) => set.apply(content, pending.mutation),
                None => trace!(client = %pending.set, "dropping mutation of destroyed set"),
            }
        }
    }

    fn destroy_set(&mut self, client: ClientId) {
        let Some(set) = self.sets.get(&client) else {
            return;
        };
        for id in set.operations.clone() {
            self.destroy_operation(id, Teardown::Close, false);
        }
        let Some(mut set) = self.sets.remove(&client) else {
            return;
        };
        self.lazy_copies.retain(|request| request.source != client);

        let content = &mut self.contents[set.content];
        content.pending.retain(|pending| pending.set != client);
        set.end_iteration(content);
        if self.contents.release(set.content) {
            debug!(%client, contents = self.contents.len(), "set destroyed, content released");
            return;
        }
        self.flush_pending(set.content);
        self.collect_garbage(set.content);
        debug!(%client, "set destroyed");
    }

    fn destroy_operation(&mut self, id: OperationId, teardown: Teardown, collect_garbage: bool) {
        let Some(op) = self.operations.remove(&id) else {
            return;
        };
        self.channels.remove(&op.channel);
        if teardown == Teardown::Close {
            self.events.push_back(ServiceEvent::CloseChannel {
                channel: op.channel,
            });
        }
        match op.state {
            OperationState::Incoming(incoming) => {
                self.incoming.retain(|incoming| *incoming != id);
                if let Some(timer) = incoming.timeout {
                    self.timeouts.cancel(timer);
                }
                debug!(peer = %op.peer, channel = %op.channel, "incoming operation destroyed");
            }
            OperationState::Bound(bound) => {
                let content = self.sets.get_mut(&bound.set).map(|set| {
                    set.operations.retain(|operation| *operation != id);
                    set.content
                });
                debug!(
                    client = %bound.set,
                    operation = bound.spec.operation.as_str(),
                    peer = %op.peer,
                    channel = %op.channel,
                    "operation destroyed"
                );
                if collect_garbage && let Some(content) = content {
                    self.collect_garbage(content);
                }
            }
        }
    }

    /// Drop elements no set sharing `content_id` can observe anymore.
    fn collect_garbage(&mut self, content_id: ContentId) {
        let mut readers: Vec<(u32, &[GenerationRange])> = Vec::new();
        for set in self.sets.values().filter(|set| set.content == content_id) {
            let excluded = set.excluded.as_slice();
            readers.push((set.current_generation, excluded));
            if let Some(iteration) = &set.iteration {
                readers.push((iteration.generation, excluded));
            }
            for bound in set
                .operations
                .iter()
                .filter_map(|id| self.operations.get(id).and_then(Operation::bound))
            {
                readers.push((bound.generation, excluded));
            }
        }
        let Some(content) = self.contents.get_mut(content_id) else {
            return;
        };
        let removed = content.collect_garbage(&readers);
        if removed > 0 {
            trace!(removed, remaining = content.elements.len(), "collected elements");
        }
    }

    /// Run one step of a bound operation's strategy and settle the outcome.
    fn drive(
        &mut self,
        id: OperationId,
        step: impl FnOnce(
            &mut StrategyOperation,
            &mut OperationContext<'_>,
        ) -> Result<Progress, PeerError>,
    ) {
        let Some(op) = self.operations.get_mut(&id) else {
            return;
        };
        let OperationState::Bound(bound) = &mut op.state else {
            return;
        };
        let Some(set) = self.sets.get(&bound.set) else {
            return;
        };
        let content = &self.contents[set.content];
        let mut ctx = OperationContext {
            elements: &content.elements,
            excluded: &set.excluded,
            generation: bound.generation,
            channel: op.channel,
            client: bound.set,
            request_id: bound.request_id,
            result_mode: bound.result_mode,
            events: &mut self.events,
        };
        let outcome = step(&mut bound.strategy, &mut ctx);
        let (client, request_id, channel) = (bound.set, bound.request_id, op.channel);
        match outcome {
            Ok(Progress::Continue) => {}
            Ok(Progress::Finished) => {
                debug!(%client, %channel, "operation finished");
                self.report(client, request_id, ResultStatus::Done, None);
                self.destroy_operation(id, Teardown::Close, true);
            }
            Err(error) => {
                warn!(%client, %channel, %error, "operation failed");
                self.report(client, request_id, ResultStatus::Failure, None);
                self.destroy_operation(id, Teardown::Close, true);
            }
        }
    }

    fn peer_violation(&mut self, id: OperationId, error: PeerError) {
        let Some(op) = self.operations.get(&id) else {
            return;
        };
        warn!(peer = %op.peer, channel = %op.channel, %error, "peer protocol violation");
        if let Some(bound) = op.bound() {
            let (client, request_id) = (bound.set, bound.request_id);
            self.report(client, request_id, ResultStatus::Failure, None);
        }
        self.destroy_operation(id, Teardown::Close, true);
    }

    /// First frame on an incoming channel: the operation request.
    fn handle_request(&mut self, id: OperationId, message: P2pMessage) -> Result<(), PeerError> {
        let (operation, app_id, salt, element_count, context) = match message {
            P2pMessage::OperationRequest {
                operation,
                app_id,
                salt,
                element_count,
                context,
            } => (operation, app_id, salt, element_count, context),
            other => return Err(PeerError::Unexpected(other.name())),
        };
        if let Some(context) = &context
            && context.len() > self.config.max_context_size
        {
            return Err(PeerError::ContextTooLarge {
                size: context.len(),
                max: self.config.max_context_size,
            });
        }
        let Some(op) = self.operations.get_mut(&id) else {
            return Ok(());
        };
        let OperationState::Incoming(incoming) = &mut op.state else {
            return Ok(());
        };
        if !matches!(incoming.phase, IncomingPhase::AwaitingRequest) {
            return Err(PeerError::DuplicateRequest);
        }
        let spec = OperationSpec {
            operation,
            app_id,
            salt,
            remote_element_count: element_count,
            context,
        };
        let listener = self
            .listeners
            .iter()
            .find(|listener| listener.matches(&spec))
            .map(|listener| listener.client);
        debug!(
            peer = %op.peer,
            channel = %op.channel,
            operation = operation.as_str(),
            %app_id,
            claimed = listener.is_some(),
            "operation request"
        );
        incoming.phase = IncomingPhase::Unclaimed(spec);
        if let Some(client) = listener {
            self.suggest(id, client);
        }
        Ok(())
    }

    /// Forward an unclaimed request to a listener and stop its timeout.
    fn suggest(&mut self, id: OperationId, listener: ClientId) {
        let suggest_id = self.next_suggest_id();
        let Some(op) = self.operations.get_mut(&id) else {
            return;
        };
        let OperationState::Incoming(incoming) = &mut op.state else {
            return;
        };
        let spec = match mem::replace(&mut incoming.phase, IncomingPhase::AwaitingRequest) {
            IncomingPhase::Unclaimed(spec) => spec,
            other => {
                incoming.phase = other;
                return;
            }
        };
        if let Some(timer) = incoming.timeout.take() {
            self.timeouts.cancel(timer);
        }
        debug!(client = %listener, peer = %op.peer, suggest_id, "request suggested to listener");
        self.events.push_back(ServiceEvent::ToClient {
            client: listener,
            response: ClientResponse::Request {
                accept_id: suggest_id,
                peer: op.peer,
                context: spec.context.clone(),
            },
        });
        incoming.phase = IncomingPhase::Suggested {
            spec,
            suggest_id,
            listener,
        };
    }

    /// Return requests offered to a departed listener to the waiting pool,
    /// passing each on to the next matching listener if there is one.
    fn reclaim_suggested(&mut self, departed: ClientId) {
        let mut reclaimed = Vec::new();
        for &id in &self.incoming {
            let Some(op) = self.operations.get_mut(&id) else {
                continue;
            };
            let OperationState::Incoming(incoming) = &mut op.state else {
                continue;
            };
            match mem::replace(&mut incoming.phase, IncomingPhase::AwaitingRequest) {
                IncomingPhase::Suggested { spec, listener, .. } if listener == departed => {
                    incoming.phase = IncomingPhase::Unclaimed(spec);
                    let timeout = self.config.incoming_timeout();
                    incoming.timeout = Some(self.timeouts.schedule(timeout, id));
                    reclaimed.push(id);
                }
                other => incoming.phase = other,
            }
        }
        for id in reclaimed {
            let next = self
                .operations
                .get(&id)
                .and_then(Operation::unclaimed_spec)
                .and_then(|spec| self.listeners.iter().find(|l| l.matches(spec)))
                .map(|listener| listener.client);
            debug!(client = %departed, next = ?next, "request of departed listener reclaimed");
            if let Some(listener) = next {
                self.suggest(id, listener);
            }
        }
    }

    fn find_suggested(&self, accept_id: u32) -> Option<OperationId> {
        self.incoming.iter().copied().find(|id| {
            self.operations
                .get(id)
                .is_some_and(|op| op.suggested(accept_id).is_some())
        })
    }

    fn report(
        &mut self,
        client: ClientId,
        request_id: RequestId,
        status: ResultStatus,
        element: Option<Element>,
    ) {
        self.events.push_back(ServiceEvent::ToClient {
            client,
            response: ClientResponse::Result {
                request_id,
                status,
                element,
            },
        });
    }

    fn next_suggest_id(&mut self) -> u32 {
        self.last_suggest_id = self.last_suggest_id.wrapping_add(1).max(1);
        self.last_suggest_id
    }

    fn allocate_operation(&mut self) -> OperationId {
        let id = OperationId(self.next_operation);
        self.next_operation += 1;
        id
    }

    fn allocate_channel(&mut self) -> ChannelId {
        let channel = ChannelId(self.next_channel);
        self.next_channel += 1;
        channel
    }
}
