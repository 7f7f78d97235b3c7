// Peer network collaborator
//
// The aggregator never talks to sockets itself. It drives a transport that
// implements `AppRequestNetwork`:
// - group tracking and connectivity snapshots
// - best-effort fan-out of one request to many node identities
// - per-request response mailboxes with a known expected count
// - per-identity timeouts that surface as failed responses

use crate::types::{ChainId, ConnectedValidatorSet, GroupId, NodeId};
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::mpsc;

pub mod types;

pub use types::{
    OutboundRequest, SignatureRequest, SignatureResponse, SIGNATURE_REQUEST_HANDLER_ID,
};

/// Correlates one outbound request wave with its responses
pub type RequestId = u32;

/// Network error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum NetworkError {
    #[error("Failed to fetch validator set for group {0}: {1}")]
    ValidatorSetUnavailable(GroupId, String),
    #[error("Unknown chain: {0}")]
    UnknownChain(ChainId),
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;

impl From<bincode::Error> for NetworkError {
    fn from(err: bincode::Error) -> Self {
        NetworkError::InvalidMessage(err.to_string())
    }
}

/// What a node sent back for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Application response body (possibly empty)
    Response(Vec<u8>),
    /// The request failed or its timeout fired
    Failed,
}

/// A response delivered to a request wave's mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundResponse {
    pub node_id: NodeId,
    pub request_id: RequestId,
    pub outcome: ResponseOutcome,
}

impl InboundResponse {
    pub fn response(node_id: NodeId, request_id: RequestId, body: Vec<u8>) -> Self {
        Self {
            node_id,
            request_id,
            outcome: ResponseOutcome::Response(body),
        }
    }

    pub fn failed(node_id: NodeId, request_id: RequestId) -> Self {
        Self {
            node_id,
            request_id,
            outcome: ResponseOutcome::Failed,
        }
    }
}

/// Transport used to reach validators
#[async_trait]
pub trait AppRequestNetwork: Send + Sync {
    /// Declare ongoing interest in a group's connectivity
    fn track_group(&self, group_id: GroupId);

    /// Canonical validators of `group_id` and which of their nodes are reachable
    async fn connected_canonical_validators(
        &self,
        group_id: GroupId,
    ) -> NetworkResult<ConnectedValidatorSet>;

    /// Group that owns `chain_id`
    async fn group_for_chain(&self, chain_id: ChainId) -> NetworkResult<GroupId>;

    /// Open a mailbox for `request_id` sized to the expected responses
    fn register_request_wave(
        &self,
        request_id: RequestId,
        expected_responses: usize,
    ) -> mpsc::Receiver<InboundResponse>;

    /// Stop delivering responses for `request_id`
    fn release_request_wave(&self, request_id: RequestId);

    /// Arm a timeout for `node_id` that surfaces as a failed response
    fn register_timeout(&self, request_id: RequestId, node_id: NodeId);

    /// Best-effort fan-out; returns the identities the request reached
    async fn send(
        &self,
        request: &OutboundRequest,
        targets: &HashSet<NodeId>,
        source_group: GroupId,
    ) -> HashSet<NodeId>;

    fn shutdown(&self) {}
}
