// Signature collection waves
//
// One wave asks every connected identity of every canonical entry that has
// not signed yet, under a single request id, and drains the wave's mailbox
// until the weight threshold clears or every identity the request reached
// has answered, failed or timed out. Several identities of one entry may be
// asked at once; the first valid answer counts and later ones are ignored.

use crate::cache::{MessageSignatures, SignatureCache};
use crate::crypto::{verify, PublicKey, Signature, SignatureBytes, SIGNATURE_LEN};
use crate::error::{AggregatorError, Result};
use crate::network::{
    AppRequestNetwork, InboundResponse, OutboundRequest, RequestId, ResponseOutcome,
    SignatureRequest, SignatureResponse,
};
use crate::state::AggregationState;
use crate::types::{ConnectedValidatorSet, GroupId, NodeId, SignedMessage, UnsignedMessage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How one response bears on the aggregate
#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Valid(SignatureBytes),
    /// Empty or all-zero signature: the node has not seen the message yet
    NotSeen,
    Invalid,
    Failed,
}

/// Releases a wave's mailbox however the wave ends
struct WaveGuard<'a> {
    network: &'a dyn AppRequestNetwork,
    request_id: RequestId,
}

impl Drop for WaveGuard<'_> {
    fn drop(&mut self) {
        self.network.release_request_wave(self.request_id);
    }
}

pub struct RequestCollector {
    network: Arc<dyn AppRequestNetwork>,
    cache: Arc<SignatureCache>,
    next_request_id: AtomicU32,
    app_request_timeout: Duration,
}

impl RequestCollector {
    pub fn new(
        network: Arc<dyn AppRequestNetwork>,
        cache: Arc<SignatureCache>,
        app_request_timeout: Duration,
    ) -> Self {
        Self {
            network,
            cache,
            next_request_id: AtomicU32::new(rand::random()),
            app_request_timeout,
        }
    }

    fn next_request_id(&self) -> RequestId {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Run one request wave.
    ///
    /// Returns the signed message as soon as `state` clears `quorum_pct`,
    /// or `Ok(None)` once the wave is exhausted short of it. Every verified
    /// signature is cached, excluded signers included.
    pub async fn collect(
        &self,
        message: &UnsignedMessage,
        justification: &[u8],
        connected: &ConnectedValidatorSet,
        source_group: GroupId,
        state: &mut AggregationState,
        quorum_pct: u64,
    ) -> Result<Option<SignedMessage>> {
        let cached = self.cache.get(&message.id()).unwrap_or_default();
        let targets = wave_targets(connected, state, &cached);
        if targets.is_empty() {
            debug!("No validators left to query for message {}", message.id());
            return Ok(None);
        }

        let request_id = self.next_request_id();
        let payload = SignatureRequest::new(message, justification)
            .to_bytes()
            .map_err(|e| AggregatorError::Codec(e.to_string()))?;
        let request = OutboundRequest {
            chain_id: message.source_chain_id(),
            request_id,
            deadline: self.app_request_timeout,
            payload,
        };

        for node_id in &targets {
            self.network.register_timeout(request_id, *node_id);
        }
        let mut responses = self.network.register_request_wave(request_id, targets.len());
        let _guard = WaveGuard {
            network: self.network.as_ref(),
            request_id,
        };

        debug!(
            "Collecting signatures for message {}: {} identities, {} of {} validators signed",
            message.id(),
            targets.len(),
            state.len(),
            connected.validators().len()
        );

        let sent_to = self.network.send(&request, &targets, source_group).await;
        for node_id in targets.difference(&sent_to) {
            warn!("Failed to send signature request to node {}", node_id);
        }

        // Identities the request reached that have not answered yet
        let mut pending = sent_to;
        let deadline = Instant::now() + self.app_request_timeout;

        while !pending.is_empty() {
            let response = match tokio::time::timeout_at(deadline, responses.recv()).await {
                Ok(Some(response)) => response,
                Ok(None) => {
                    debug!("Response mailbox for request {} closed", request_id);
                    break;
                }
                Err(_) => {
                    warn!(
                        "Request {} timed out with {} responses outstanding",
                        request_id,
                        pending.len()
                    );
                    break;
                }
            };

            if response.request_id != request_id || !pending.remove(&response.node_id) {
                debug!("Skipping irrelevant response from node {}", response.node_id);
                continue;
            }

            if let Some(signed) = self.handle_response(message, connected, state, &response, quorum_pct)? {
                info!(
                    "Created signed message {} with weight {} of {}",
                    message.id(),
                    state.accumulated_weight(),
                    connected.total_weight()
                );
                return Ok(Some(signed));
            }
        }

        Ok(None)
    }

    fn handle_response(
        &self,
        message: &UnsignedMessage,
        connected: &ConnectedValidatorSet,
        state: &mut AggregationState,
        response: &InboundResponse,
        quorum_pct: u64,
    ) -> Result<Option<SignedMessage>> {
        let Some((index, validator)) = connected.validator_for_node(&response.node_id) else {
            debug!("Response from node {} outside the validator set", response.node_id);
            return Ok(None);
        };

        let signature = match check_response(message, &response.outcome, &validator.public_key) {
            Verdict::Valid(signature) => signature,
            Verdict::NotSeen => {
                debug!("Node {} has not seen message {}", response.node_id, message.id());
                return Ok(None);
            }
            Verdict::Invalid => {
                debug!("Invalid signature response from node {}", response.node_id);
                return Ok(None);
            }
            Verdict::Failed => {
                debug!("Request to node {} failed or timed out", response.node_id);
                return Ok(None);
            }
        };

        debug!(
            "Valid signature from node {} (weight {}) for message {}",
            response.node_id,
            validator.weight,
            message.id()
        );
        self.cache
            .add(message.id(), validator.public_key_bytes, signature);

        if !state.insert(index, validator.weight, signature) {
            if state.is_excluded(index) {
                debug!("Validator {} is excluded; signature cached only", index);
            }
            return Ok(None);
        }

        state.aggregate_if_sufficient_weight(message, connected.total_weight(), quorum_pct)
    }
}

/// Connected identities of every entry that has not signed yet and has no
/// cached signature. Excluded entries are still asked until their signature
/// reaches the cache.
fn wave_targets(
    connected: &ConnectedValidatorSet,
    state: &AggregationState,
    cached: &MessageSignatures,
) -> HashSet<NodeId> {
    connected
        .validators()
        .iter()
        .enumerate()
        .filter(|(i, v)| !state.contains(*i) && !cached.contains_key(&v.public_key_bytes))
        .flat_map(|(_, v)| v.node_ids.iter())
        .filter(|n| connected.is_connected(n))
        .copied()
        .collect()
}

fn check_response(
    message: &UnsignedMessage,
    outcome: &ResponseOutcome,
    public_key: &PublicKey,
) -> Verdict {
    let body = match outcome {
        ResponseOutcome::Failed => return Verdict::Failed,
        ResponseOutcome::Response(body) => body,
    };

    let response = match SignatureResponse::from_bytes(body) {
        Ok(Some(response)) => response,
        Ok(None) => return Verdict::NotSeen,
        Err(e) => {
            debug!("Failed to decode signature response: {}", e);
            return Verdict::Invalid;
        }
    };

    if response.signature.iter().all(|b| *b == 0) {
        return Verdict::NotSeen;
    }
    if response.signature.len() != SIGNATURE_LEN {
        debug!(
            "Response signature has length {}, expected {}",
            response.signature.len(),
            SIGNATURE_LEN
        );
        return Verdict::Invalid;
    }

    let signature = match Signature::from_bytes(&response.signature) {
        Ok(signature) => signature,
        Err(_) => return Verdict::Invalid,
    };
    if !verify(public_key, &signature, message.bytes()) {
        return Verdict::Invalid;
    }
    Verdict::Valid(signature.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{sha256, SecretKey};
    use crate::types::{CanonicalValidator, CanonicalValidatorSet};
    use libp2p::PeerId;

    fn body(signature: Vec<u8>) -> ResponseOutcome {
        ResponseOutcome::Response(SignatureResponse { signature }.to_bytes().unwrap())
    }

    #[test]
    fn test_check_response_verdicts() {
        let message = UnsignedMessage::new(1, sha256(b"chain"), b"m".to_vec()).unwrap();
        let sk = SecretKey::generate();
        let pk = sk.public_key();
        let good = sk.sign(message.bytes()).to_bytes();

        assert_eq!(
            check_response(&message, &body(good.to_vec()), &pk),
            Verdict::Valid(good)
        );
        assert_eq!(
            check_response(&message, &ResponseOutcome::Response(vec![]), &pk),
            Verdict::NotSeen
        );
        assert_eq!(check_response(&message, &body(vec![0u8; 96]), &pk), Verdict::NotSeen);
        assert_eq!(check_response(&message, &body(vec![1u8; 12]), &pk), Verdict::Invalid);
        assert_eq!(
            check_response(&message, &ResponseOutcome::Response(vec![0xff; 3]), &pk),
            Verdict::Invalid
        );
        assert_eq!(check_response(&message, &ResponseOutcome::Failed, &pk), Verdict::Failed);

        // Signed by someone else
        let other = SecretKey::generate().sign(message.bytes()).to_bytes();
        assert_eq!(check_response(&message, &body(other.to_vec()), &pk), Verdict::Invalid);
    }

    #[test]
    fn test_wave_targets_skip_signed_and_disconnected() {
        let (a1, a2, b1, c1) = (PeerId::random(), PeerId::random(), PeerId::random(), PeerId::random());
        let key = || SecretKey::generate().public_key();
        let set = CanonicalValidatorSet::new(vec![
            CanonicalValidator::new(key(), 10, vec![a1, a2]),
            CanonicalValidator::new(key(), 10, vec![b1]),
            CanonicalValidator::new(key(), 10, vec![c1]),
        ]);
        // c1 is not connected
        let connected = ConnectedValidatorSet::new(set, [a1, a2, b1].into_iter().collect());

        let mut state = AggregationState::default();
        state.insert(1, 10, [0u8; 96]);

        let targets = wave_targets(&connected, &state, &MessageSignatures::new());
        assert_eq!(targets, [a1, a2].into_iter().collect());
    }

    #[test]
    fn test_wave_targets_include_excluded_entries() {
        let node = PeerId::random();
        let set = CanonicalValidatorSet::new(vec![CanonicalValidator::new(
            SecretKey::generate().public_key(),
            10,
            vec![node],
        )]);
        let connected = ConnectedValidatorSet::new(set, [node].into_iter().collect());
        let state = AggregationState::new([0].into_iter().collect());

        assert!(wave_targets(&connected, &state, &MessageSignatures::new()).contains(&node));
    }

    #[test]
    fn test_wave_targets_skip_cached_excluded_entries() {
        let (excluded_node, other_node) = (PeerId::random(), PeerId::random());
        let excluded_key = SecretKey::generate().public_key();
        let set = CanonicalValidatorSet::new(vec![
            CanonicalValidator::new(excluded_key.clone(), 10, vec![excluded_node]),
            CanonicalValidator::new(SecretKey::generate().public_key(), 10, vec![other_node]),
        ]);
        let connected =
            ConnectedValidatorSet::new(set, [excluded_node, other_node].into_iter().collect());
        let excluded_index = connected
            .validators()
            .iter()
            .position(|v| v.public_key_bytes == excluded_key.to_bytes())
            .unwrap();
        let state = AggregationState::new([excluded_index].into_iter().collect());

        let mut cached = MessageSignatures::new();
        cached.insert(excluded_key.to_bytes(), [1u8; 96]);

        let targets = wave_targets(&connected, &state, &cached);
        assert_eq!(targets, [other_node].into_iter().collect());
    }
}
