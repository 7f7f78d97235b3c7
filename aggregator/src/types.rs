/// Core data types: messages, canonical validator sets and connectivity
/// snapshots.

use crate::crypto::{
    aggregate_public_keys, sha256, verify, CanonicalBitSet, CryptoError, Id, PublicKey,
    PublicKeyBytes, Signature, SignatureBytes,
};
use crate::quorum::stake_weight_exceeds_threshold;
use libp2p::PeerId;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Physical node identity on the peer network
pub type NodeId = PeerId;

/// Identifier of a validator group (the set of validators allowed to sign
/// for a message source)
pub type GroupId = Id;

/// Identifier of a message source chain
pub type ChainId = Id;

/// Content-derived message identifier
pub type MessageId = Id;

/// The group that is never balance tracked
pub const PRIMARY_GROUP_ID: GroupId = Id::EMPTY;

const CODEC_VERSION: u16 = 0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Payload of {0} bytes exceeds the u32 length prefix")]
    PayloadTooLarge(usize),
}

/// Big-endian u32 length prefix for a payload
fn length_prefix(len: usize) -> Result<[u8; 4], MessageError> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| MessageError::PayloadTooLarge(len))
}

/// A message awaiting signatures
///
/// Immutable once built; `id()` keys both the signature cache and
/// request correlation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedMessage {
    network_id: u32,
    source_chain_id: ChainId,
    payload: Vec<u8>,
    bytes: Vec<u8>,
    id: MessageId,
}

impl UnsignedMessage {
    pub fn new(
        network_id: u32,
        source_chain_id: ChainId,
        payload: Vec<u8>,
    ) -> Result<Self, MessageError> {
        let prefix = length_prefix(payload.len())?;
        let mut bytes = Vec::with_capacity(2 + 4 + 32 + 4 + payload.len());
        bytes.extend_from_slice(&CODEC_VERSION.to_be_bytes());
        bytes.extend_from_slice(&network_id.to_be_bytes());
        bytes.extend_from_slice(source_chain_id.as_bytes());
        bytes.extend_from_slice(&prefix);
        bytes.extend_from_slice(&payload);
        let id = sha256(&bytes);

        Ok(Self {
            network_id,
            source_chain_id,
            payload,
            bytes,
            id,
        })
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn network_id(&self) -> u32 {
        self.network_id
    }

    pub fn source_chain_id(&self) -> ChainId {
        self.source_chain_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Canonical bytes that validators sign
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Aggregate signature plus the canonical indices that produced it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitSetSignature {
    pub signers: Vec<u8>,
    pub signature: SignatureBytes,
}

/// A message with its aggregate signature attached
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedMessage {
    pub unsigned_message: UnsignedMessage,
    pub signature: BitSetSignature,
}

impl SignedMessage {
    pub fn signers(&self) -> Result<CanonicalBitSet, CryptoError> {
        CanonicalBitSet::from_bytes(&self.signature.signers)
    }

    /// Check the aggregate against a canonical validator set.
    ///
    /// Returns `Ok(false)` when the signers' weight does not clear
    /// `quorum_pct` or the signature does not verify; malformed signer
    /// bitsets and signature bytes are errors.
    pub fn verify(
        &self,
        validator_set: &CanonicalValidatorSet,
        quorum_pct: u64,
    ) -> Result<bool, CryptoError> {
        let signers = self.signers()?;
        if signers.bit_len() > validator_set.len() {
            return Err(CryptoError::InvalidBitSet(format!(
                "signer index {} out of range for {} validators",
                signers.bit_len() - 1,
                validator_set.len()
            )));
        }

        let mut signer_weight: u128 = 0;
        let mut keys = Vec::with_capacity(signers.len());
        for index in signers.indices() {
            let validator = &validator_set.validators[index];
            signer_weight += validator.weight as u128;
            keys.push(validator.public_key.clone());
        }
        if !stake_weight_exceeds_threshold(signer_weight, validator_set.total_weight, quorum_pct) {
            return Ok(false);
        }

        let aggregate_key = aggregate_public_keys(&keys)?;
        let signature = Signature::from_bytes(&self.signature.signature)?;
        Ok(verify(&aggregate_key, &signature, self.unsigned_message.bytes()))
    }
}

/// One logical signer: a public key backed by one or more node identities
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalValidator {
    pub public_key: PublicKey,
    pub public_key_bytes: PublicKeyBytes,
    pub weight: u64,
    pub node_ids: Vec<NodeId>,
}

impl CanonicalValidator {
    pub fn new(public_key: PublicKey, weight: u64, node_ids: Vec<NodeId>) -> Self {
        Self {
            public_key_bytes: public_key.to_bytes(),
            public_key,
            weight,
            node_ids,
        }
    }
}

/// Validators of a group in canonical order
///
/// The index of an entry is its bit in the aggregate's signer bitset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CanonicalValidatorSet {
    pub validators: Vec<CanonicalValidator>,
    pub total_weight: u64,
}

impl CanonicalValidatorSet {
    /// Wrap validators that are already in canonical order
    pub fn new(validators: Vec<CanonicalValidator>) -> Self {
        let total_weight = validators
            .iter()
            .fold(0u64, |acc, v| acc.saturating_add(v.weight));
        Self {
            validators,
            total_weight,
        }
    }

    /// Build the canonical set from per-node registrations.
    ///
    /// Nodes sharing a public key merge into one entry whose weight is the
    /// sum of theirs; entries are ordered by compressed public key.
    pub fn canonicalize(nodes: impl IntoIterator<Item = (NodeId, PublicKey, u64)>) -> Self {
        let mut merged: BTreeMap<PublicKeyBytes, CanonicalValidator> = BTreeMap::new();
        for (node_id, public_key, weight) in nodes {
            let entry = merged
                .entry(public_key.to_bytes())
                .or_insert_with(|| CanonicalValidator::new(public_key, 0, Vec::new()));
            entry.weight = entry.weight.saturating_add(weight);
            entry.node_ids.push(node_id);
        }
        Self::new(merged.into_values().collect())
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

/// Snapshot of a group restricted to currently reachable node identities
#[derive(Clone, Debug)]
pub struct ConnectedValidatorSet {
    pub validator_set: CanonicalValidatorSet,
    pub connected_weight: u64,
    pub connected_nodes: HashSet<NodeId>,
    node_index: HashMap<NodeId, usize>,
}

impl ConnectedValidatorSet {
    /// A canonical entry counts towards `connected_weight` once, as soon as
    /// any one of its node identities is connected.
    pub fn new(validator_set: CanonicalValidatorSet, connected_nodes: HashSet<NodeId>) -> Self {
        let mut node_index = HashMap::new();
        let mut connected_weight = 0u64;
        for (i, validator) in validator_set.validators.iter().enumerate() {
            for node_id in &validator.node_ids {
                node_index.insert(*node_id, i);
            }
            if validator.node_ids.iter().any(|n| connected_nodes.contains(n)) {
                connected_weight = connected_weight.saturating_add(validator.weight);
            }
        }

        Self {
            validator_set,
            connected_weight,
            connected_nodes,
            node_index,
        }
    }

    pub fn total_weight(&self) -> u64 {
        self.validator_set.total_weight
    }

    pub fn validators(&self) -> &[CanonicalValidator] {
        &self.validator_set.validators
    }

    pub fn is_connected(&self, node_id: &NodeId) -> bool {
        self.connected_nodes.contains(node_id)
    }

    /// Canonical entry backed by `node_id`
    pub fn validator_for_node(&self, node_id: &NodeId) -> Option<(usize, &CanonicalValidator)> {
        self.node_index
            .get(node_id)
            .map(|&i| (i, &self.validator_set.validators[i]))
    }

    /// Connected share of total weight, in percent
    pub fn connected_percentage(&self) -> f64 {
        if self.total_weight() == 0 {
            return 0.0;
        }
        self.connected_weight as f64 / self.total_weight() as f64 * 100.0
    }

    /// An empty or weightless set never has quorum
    pub fn has_quorum(&self, quorum_pct: u64) -> bool {
        self.total_weight() > 0
            && stake_weight_exceeds_threshold(
                self.connected_weight as u128,
                self.total_weight(),
                quorum_pct,
            )
    }
}
