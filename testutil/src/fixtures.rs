/// Validator fixtures with real keys

use libp2p::PeerId;
use signature_aggregator::crypto::SecretKey;
use signature_aggregator::{CanonicalValidator, CanonicalValidatorSet, NodeId};

/// One canonical entry and the key its nodes sign with
#[derive(Clone)]
pub struct TestValidator {
    pub secret_key: SecretKey,
    pub weight: u64,
    pub node_ids: Vec<NodeId>,
}

/// A canonical validator set with the secret keys behind it
#[derive(Clone)]
pub struct ValidatorFixture {
    /// In canonical order: `validators[i]` is bit `i` of the signer bitset
    pub validators: Vec<TestValidator>,
    pub set: CanonicalValidatorSet,
}

impl ValidatorFixture {
    /// One node identity per weight
    pub fn with_weights(weights: &[u64]) -> Self {
        let entries: Vec<(u64, usize)> = weights.iter().map(|w| (*w, 1)).collect();
        Self::with_nodes(&entries)
    }

    /// `(weight, node count)` per entry; nodes of an entry share its key
    pub fn with_nodes(entries: &[(u64, usize)]) -> Self {
        let mut validators: Vec<TestValidator> = entries
            .iter()
            .map(|(weight, nodes)| TestValidator {
                secret_key: SecretKey::generate(),
                weight: *weight,
                node_ids: (0..*nodes).map(|_| PeerId::random()).collect(),
            })
            .collect();
        validators.sort_by_key(|v| v.secret_key.public_key().to_bytes());

        let set = CanonicalValidatorSet::new(
            validators
                .iter()
                .map(|v| {
                    CanonicalValidator::new(v.secret_key.public_key(), v.weight, v.node_ids.clone())
                })
                .collect(),
        );
        Self { validators, set }
    }

    /// Canonical index of the first entry with `weight`
    pub fn index_of_weight(&self, weight: u64) -> usize {
        self.validators
            .iter()
            .position(|v| v.weight == weight)
            .unwrap_or_else(|| panic!("no validator with weight {}", weight))
    }

    pub fn validator_with_weight(&self, weight: u64) -> &TestValidator {
        &self.validators[self.index_of_weight(weight)]
    }

    /// Node identities of the entry with `weight`
    pub fn nodes_with_weight(&self, weight: u64) -> Vec<NodeId> {
        self.validator_with_weight(weight).node_ids.clone()
    }

    pub fn all_nodes(&self) -> Vec<NodeId> {
        self.validators
            .iter()
            .flat_map(|v| v.node_ids.iter().copied())
            .collect()
    }

    pub fn total_weight(&self) -> u64 {
        self.set.total_weight
    }
}
