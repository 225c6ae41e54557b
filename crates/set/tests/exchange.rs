use std::collections::HashMap;

use libp2p::PeerId;
use trellis_set::{
    AppId, ChannelId, ClientId, ClientRequest, ClientResponse, Element, OperationType, RequestId,
    ResultMode, ResultStatus, ServiceEvent, SetService, SetServiceConfig,
};

const CLIENT: ClientId = ClientId(1);
const APP: AppId = AppId::repeat_byte(0x42);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

fn test_peer_id(n: u8) -> PeerId {
    let key = libp2p::identity::ed25519::SecretKey::try_from_bytes([n; 32]).unwrap();
    let keypair = libp2p::identity::Keypair::from(libp2p::identity::ed25519::Keypair::from(key));
    keypair.public().to_peer_id()
}

fn element(tag: &str) -> Element {
    Element::new(7, tag.as_bytes().to_vec())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Side {
    Alice,
    Bob,
}

impl Side {
    fn other(self) -> Self {
        match self {
            Self::Alice => Self::Bob,
            Self::Bob => Self::Alice,
        }
    }
}

struct Node {
    service: SetService,
    responses: Vec<ClientResponse>,
}

/// Two services joined by in-memory channels.
struct Network {
    alice: Node,
    bob: Node,
    links: HashMap<(Side, ChannelId), (Side, ChannelId)>,
}

impl Network {
    fn new() -> Self {
        init_tracing();
        let node = |n| Node {
            service: SetService::new(test_peer_id(n), SetServiceConfig::default()),
            responses: Vec::new(),
        };
        Self {
            alice: node(1),
            bob: node(2),
            links: HashMap::new(),
        }
    }

    fn node(&mut self, side: Side) -> &mut Node {
        match side {
            Side::Alice => &mut self.alice,
            Side::Bob => &mut self.bob,
        }
    }

    fn client(&mut self, side: Side, request: ClientRequest) {
        self.node(side).service.handle_client(CLIENT, request).unwrap();
        self.pump();
    }

    fn create_set(&mut self, side: Side, operation: OperationType, elements: &[&str]) {
        self.client(side, ClientRequest::CreateSet { operation });
        for tag in elements {
            self.client(side, ClientRequest::Add(element(tag)));
        }
    }

    fn listen(&mut self, side: Side, operation: OperationType) {
        let listen = ClientRequest::Listen {
            operation,
            app_id: APP,
        };
        self.client(side, listen);
    }

    /// Deliver events until both services are idle.
    fn pump(&mut self) {
        loop {
            let mut idle = true;
            for side in [Side::Alice, Side::Bob] {
                while let Some(event) = self.node(side).service.poll_event() {
                    idle = false;
                    self.deliver(side, event);
                }
            }
            if idle {
                return;
            }
        }
    }

    fn deliver(&mut self, side: Side, event: ServiceEvent) {
        match event {
            ServiceEvent::ToClient { client, response } => {
                assert_eq!(client, CLIENT);
                self.node(side).responses.push(response);
            }
            ServiceEvent::OpenChannel { channel, peer } => {
                let remote = side.other();
                assert_eq!(*self.node(remote).service.local_peer(), peer);
                let local_peer = *self.node(side).service.local_peer();
                let remote_channel = self.node(remote).service.inbound_channel(local_peer);
                self.links.insert((side, channel), (remote, remote_channel));
                self.links.insert((remote, remote_channel), (side, channel));
            }
            ServiceEvent::Send { channel, frame } => {
                if let Some(&(remote, remote_channel)) = self.links.get(&(side, channel)) {
                    self.node(remote)
                        .service
                        .handle_channel_message(remote_channel, &frame);
                }
            }
            ServiceEvent::CloseChannel { channel } => {
                if let Some((remote, remote_channel)) = self.links.remove(&(side, channel)) {
                    self.links.remove(&(remote, remote_channel));
                    self.node(remote).service.channel_ended(remote_channel);
                }
            }
            ServiceEvent::DisconnectClient { client } => panic!("{client} disconnected"),
        }
    }

    /// Accept id of the request last suggested to `side`.
    fn suggested(&mut self, side: Side) -> u32 {
        match self.node(side).responses.last() {
            Some(ClientResponse::Request { accept_id, .. }) => *accept_id,
            other => panic!("expected a request, got {other:?}"),
        }
    }

    fn results(&mut self, side: Side) -> Results {
        self.node(side)
            .responses
            .iter()
            .filter_map(|response| match response {
                ClientResponse::Result {
                    status, element, ..
                } => Some((*status, element.clone())),
                _ => None,
            })
            .collect()
    }

    fn evaluate(&mut self, result_mode: ResultMode, context: Option<&'static [u8]>) {
        let target_peer = *self.bob.service.local_peer();
        self.client(
            Side::Alice,
            ClientRequest::Evaluate {
                target_peer,
                app_id: APP,
                result_mode,
                request_id: RequestId(1),
                context: context.map(bytes::Bytes::from_static),
            },
        );
    }

    fn accept(&mut self, result_mode: ResultMode) {
        let accept_id = self.suggested(Side::Bob);
        self.client(
            Side::Bob,
            ClientRequest::Accept {
                accept_id,
                request_id: RequestId(2),
                result_mode,
            },
        );
    }
}

type Results = Vec<(ResultStatus, Option<Element>)>;

fn sorted(mut results: Results) -> Results {
    results.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    results
}

fn ok(tags: &[&str]) -> Results {
    tags.iter().map(|tag| (ResultStatus::Ok, Some(element(tag)))).collect()
}

fn done_last(results: &[(ResultStatus, Option<Element>)]) {
    assert_eq!(results.last(), Some(&(ResultStatus::Done, None)));
    let done = results.iter().filter(|(status, _)| *status == ResultStatus::Done).count();
    assert_eq!(done, 1);
}

#[test]
fn union_full_reports_every_element_once() {
    let mut net = Network::new();
    net.create_set(Side::Alice, OperationType::Union, &["x", "a"]);
    net.create_set(Side::Bob, OperationType::Union, &["x", "b"]);
    net.listen(Side::Bob, OperationType::Union);

    net.evaluate(ResultMode::Full, Some(b"round 1"));
    assert!(matches!(
        net.bob.responses.last(),
        Some(ClientResponse::Request { context: Some(context), .. })
            if context.as_ref() == b"round 1"
    ));
    net.accept(ResultMode::Full);

    for side in [Side::Alice, Side::Bob] {
        let mut results = net.results(side);
        done_last(&results);
        results.pop();
        assert_eq!(sorted(results), sorted(ok(&["x", "a", "b"])));
    }
    assert_eq!(net.alice.service.operation_count(), 0);
    assert_eq!(net.bob.service.operation_count(), 0);
    assert!(net.links.is_empty());

    // The operation is gone; cancelling it changes nothing.
    let before = net.alice.responses.len();
    let cancel = ClientRequest::Cancel {
        request_id: RequestId(1),
    };
    net.client(Side::Alice, cancel);
    assert_eq!(net.alice.responses.len(), before);
}

#[test]
fn union_symmetric_and_added() {
    let mut net = Network::new();
    net.create_set(Side::Alice, OperationType::Union, &["x", "a"]);
    net.create_set(Side::Bob, OperationType::Union, &["x", "b", "c"]);
    net.listen(Side::Bob, OperationType::Union);

    net.evaluate(ResultMode::Added, None);
    net.accept(ResultMode::Symmetric);

    let mut alice = net.results(Side::Alice);
    done_last(&alice);
    alice.pop();
    assert_eq!(sorted(alice), sorted(ok(&["b", "c"])));

    let mut bob = net.results(Side::Bob);
    done_last(&bob);
    bob.pop();
    assert_eq!(
        sorted(bob),
        sorted(vec![
            (ResultStatus::AddLocal, Some(element("a"))),
            (ResultStatus::AddRemote, Some(element("b"))),
            (ResultStatus::AddRemote, Some(element("c"))),
        ])
    );
}

#[test]
fn operation_observes_set_as_of_evaluation() {
    let mut net = Network::new();
    net.create_set(Side::Alice, OperationType::Union, &["a"]);
    net.create_set(Side::Bob, OperationType::Union, &["b"]);
    net.listen(Side::Bob, OperationType::Union);

    net.evaluate(ResultMode::Full, None);
    // Mutations after evaluation stay out of the running operation.
    net.client(Side::Alice, ClientRequest::Add(element("late")));
    net.client(Side::Alice, ClientRequest::Remove(element("a")));
    net.accept(ResultMode::Full);

    let mut bob = net.results(Side::Bob);
    done_last(&bob);
    bob.pop();
    assert_eq!(sorted(bob), sorted(ok(&["a", "b"])));
}

#[test]
fn intersection_full_and_removed() {
    let mut net = Network::new();
    net.create_set(Side::Alice, OperationType::Intersection, &["x", "y", "a"]);
    net.create_set(Side::Bob, OperationType::Intersection, &["x", "y", "b"]);
    net.listen(Side::Bob, OperationType::Intersection);

    net.evaluate(ResultMode::Full, None);
    net.accept(ResultMode::Removed);

    let mut alice = net.results(Side::Alice);
    done_last(&alice);
    alice.pop();
    assert_eq!(sorted(alice), sorted(ok(&["x", "y"])));

    let mut bob = net.results(Side::Bob);
    done_last(&bob);
    bob.pop();
    assert_eq!(bob, ok(&["b"]));
}

#[test]
fn rejected_request_fails_initiator() {
    let mut net = Network::new();
    net.create_set(Side::Alice, OperationType::Union, &["a"]);
    net.listen(Side::Bob, OperationType::Union);

    net.evaluate(ResultMode::Full, None);
    let accept_id = net.suggested(Side::Bob);
    net.client(Side::Bob, ClientRequest::Reject { accept_id });

    assert_eq!(net.results(Side::Alice), vec![(ResultStatus::Failure, None)]);
    assert_eq!(net.alice.service.operation_count(), 0);
}

#[test]
fn mismatched_accepting_set_fails_both_sides() {
    let mut net = Network::new();
    net.create_set(Side::Alice, OperationType::Union, &["a"]);
    net.create_set(Side::Bob, OperationType::Intersection, &["a"]);
    net.listen(Side::Bob, OperationType::Union);

    net.evaluate(ResultMode::Full, None);
    net.accept(ResultMode::Full);

    assert_eq!(net.results(Side::Bob), vec![(ResultStatus::Failure, None)]);
    assert_eq!(net.results(Side::Alice), vec![(ResultStatus::Failure, None)]);
}

#[test]
fn closing_initiator_set_closes_channel() {
    let mut net = Network::new();
    net.create_set(Side::Alice, OperationType::Union, &["a"]);
    net.create_set(Side::Bob, OperationType::Union, &["b"]);
    net.listen(Side::Bob, OperationType::Union);
    net.evaluate(ResultMode::Full, None);

    net.alice.service.client_disconnected(CLIENT);
    net.pump();

    assert!(net.links.is_empty());
    assert_eq!(net.bob.service.operation_count(), 0);
    // Bob was offered the request before it vanished.
    assert!(matches!(net.bob.responses.last(), Some(ClientResponse::Request { .. })));
}
