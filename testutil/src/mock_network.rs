/// In-memory transport
///
/// Serves validator sets and connectivity from fixtures and answers each
/// signature request from a spawned task according to the target node's
/// behavior. Counters let tests assert how much traffic a call produced.

use async_trait::async_trait;
use parking_lot::Mutex;
use signature_aggregator::crypto::SecretKey;
use signature_aggregator::network::{
    AppRequestNetwork, InboundResponse, NetworkError, NetworkResult, OutboundRequest, RequestId,
    ResponseOutcome, SignatureRequest, SignatureResponse,
};
use signature_aggregator::{CanonicalValidatorSet, ChainId, ConnectedValidatorSet, GroupId, NodeId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::fixtures::ValidatorFixture;

/// How a node answers signature requests
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeBehavior {
    /// Sign with the node's key
    Sign,
    /// Sign with an unrelated key
    WrongKey,
    /// Return a signature of the wrong length
    WrongLength,
    /// Return an empty body: message not seen yet
    NotSeen,
    /// Answer with a failed response
    Fail,
    /// Never answer; only the registered timeout fires
    Silent,
    /// The send to this node fails
    Unreachable,
}

type Mailboxes = Arc<Mutex<HashMap<RequestId, mpsc::Sender<InboundResponse>>>>;

#[derive(Default)]
pub struct MockNetwork {
    groups: Mutex<HashMap<GroupId, CanonicalValidatorSet>>,
    chains: Mutex<HashMap<ChainId, GroupId>>,
    keys: Mutex<HashMap<NodeId, SecretKey>>,
    connected: Mutex<HashSet<NodeId>>,
    behaviors: Mutex<HashMap<NodeId, NodeBehavior>>,
    delays: Mutex<HashMap<NodeId, Duration>>,

    mailboxes: Mailboxes,
    timeouts: Mutex<HashMap<RequestId, HashSet<NodeId>>>,
    tracked: Mutex<HashSet<GroupId>>,

    send_calls: AtomicUsize,
    requests_delivered: AtomicUsize,
    validator_set_fetches: AtomicUsize,
    released_waves: AtomicUsize,
    shut_down: AtomicBool,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `fixture` as `group_id`'s validator set with every node connected
    pub fn add_group(&self, group_id: GroupId, fixture: &ValidatorFixture) {
        self.groups.lock().insert(group_id, fixture.set.clone());
        let mut keys = self.keys.lock();
        let mut connected = self.connected.lock();
        for validator in &fixture.validators {
            for node_id in &validator.node_ids {
                keys.insert(*node_id, validator.secret_key.clone());
                connected.insert(*node_id);
            }
        }
    }

    pub fn add_chain(&self, chain_id: ChainId, group_id: GroupId) {
        self.chains.lock().insert(chain_id, group_id);
    }

    pub fn set_behavior(&self, node_id: NodeId, behavior: NodeBehavior) {
        self.behaviors.lock().insert(node_id, behavior);
    }

    /// Delay before `node_id`'s answer is delivered
    pub fn set_delay(&self, node_id: NodeId, delay: Duration) {
        self.delays.lock().insert(node_id, delay);
    }

    pub fn connect(&self, node_id: NodeId) {
        self.connected.lock().insert(node_id);
    }

    pub fn disconnect(&self, node_id: NodeId) {
        self.connected.lock().remove(&node_id);
    }

    /// Number of `send` calls (request waves)
    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// Number of node identities a request actually reached
    pub fn requests_delivered(&self) -> usize {
        self.requests_delivered.load(Ordering::SeqCst)
    }

    pub fn validator_set_fetches(&self) -> usize {
        self.validator_set_fetches.load(Ordering::SeqCst)
    }

    pub fn released_waves(&self) -> usize {
        self.released_waves.load(Ordering::SeqCst)
    }

    /// Waves registered and not yet released
    pub fn open_waves(&self) -> usize {
        self.mailboxes.lock().len()
    }

    pub fn is_tracked(&self, group_id: &GroupId) -> bool {
        self.tracked.lock().contains(group_id)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn behavior(&self, node_id: &NodeId) -> NodeBehavior {
        self.behaviors
            .lock()
            .get(node_id)
            .copied()
            .unwrap_or(NodeBehavior::Sign)
    }

    fn answer(&self, node_id: &NodeId, behavior: NodeBehavior, message: &[u8]) -> Option<ResponseOutcome> {
        let signature = match behavior {
            NodeBehavior::Sign => {
                let key = self.keys.lock().get(node_id).cloned()?;
                key.sign(message).to_bytes().to_vec()
            }
            NodeBehavior::WrongKey => SecretKey::generate().sign(message).to_bytes().to_vec(),
            NodeBehavior::WrongLength => vec![7u8; 48],
            NodeBehavior::NotSeen => return Some(ResponseOutcome::Response(Vec::new())),
            NodeBehavior::Fail => return Some(ResponseOutcome::Failed),
            NodeBehavior::Silent | NodeBehavior::Unreachable => return None,
        };
        let body = SignatureResponse { signature }.to_bytes().ok()?;
        Some(ResponseOutcome::Response(body))
    }
}

fn deliver(mailboxes: Mailboxes, response: InboundResponse, delay: Duration) {
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let sender = mailboxes.lock().get(&response.request_id).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(response).await;
        }
    });
}

#[async_trait]
impl AppRequestNetwork for MockNetwork {
    fn track_group(&self, group_id: GroupId) {
        self.tracked.lock().insert(group_id);
    }

    async fn connected_canonical_validators(
        &self,
        group_id: GroupId,
    ) -> NetworkResult<ConnectedValidatorSet> {
        self.validator_set_fetches.fetch_add(1, Ordering::SeqCst);
        let set = self.groups.lock().get(&group_id).cloned().ok_or_else(|| {
            NetworkError::ValidatorSetUnavailable(group_id, "unknown group".into())
        })?;
        let connected = self.connected.lock().clone();
        Ok(ConnectedValidatorSet::new(set, connected))
    }

    async fn group_for_chain(&self, chain_id: ChainId) -> NetworkResult<GroupId> {
        self.chains
            .lock()
            .get(&chain_id)
            .copied()
            .ok_or(NetworkError::UnknownChain(chain_id))
    }

    fn register_request_wave(
        &self,
        request_id: RequestId,
        expected_responses: usize,
    ) -> mpsc::Receiver<InboundResponse> {
        let (tx, rx) = mpsc::channel(expected_responses.max(1));
        self.mailboxes.lock().insert(request_id, tx);
        rx
    }

    fn release_request_wave(&self, request_id: RequestId) {
        self.mailboxes.lock().remove(&request_id);
        self.timeouts.lock().remove(&request_id);
        self.released_waves.fetch_add(1, Ordering::SeqCst);
    }

    fn register_timeout(&self, request_id: RequestId, node_id: NodeId) {
        self.timeouts
            .lock()
            .entry(request_id)
            .or_default()
            .insert(node_id);
    }

    async fn send(
        &self,
        request: &OutboundRequest,
        targets: &HashSet<NodeId>,
        _source_group: GroupId,
    ) -> HashSet<NodeId> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let Ok(decoded) = SignatureRequest::from_bytes(&request.payload) else {
            return HashSet::new();
        };

        let mut sent = HashSet::new();
        for node_id in targets {
            let behavior = self.behavior(node_id);
            if behavior == NodeBehavior::Unreachable || !self.connected.lock().contains(node_id) {
                continue;
            }
            sent.insert(*node_id);
            self.requests_delivered.fetch_add(1, Ordering::SeqCst);

            let delay = self.delays.lock().get(node_id).copied().unwrap_or_default();
            match self.answer(node_id, behavior, &decoded.message) {
                Some(outcome) => deliver(
                    Arc::clone(&self.mailboxes),
                    InboundResponse {
                        node_id: *node_id,
                        request_id: request.request_id,
                        outcome,
                    },
                    delay,
                ),
                None => {
                    // Silent nodes surface through their registered timeout
                    let armed = self
                        .timeouts
                        .lock()
                        .get(&request.request_id)
                        .map_or(false, |nodes| nodes.contains(node_id));
                    if armed {
                        deliver(
                            Arc::clone(&self.mailboxes),
                            InboundResponse::failed(*node_id, request.request_id),
                            request.deadline,
                        );
                    }
                }
            }
        }
        sent
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}
