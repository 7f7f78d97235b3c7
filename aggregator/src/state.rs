/// Per-attempt aggregation state
///
/// Tracks which canonical indices have contributed a verified signature
/// and their combined weight. Excluded indices never enter the map, and
/// an index is counted at most once no matter how many of its node
/// identities answer.

use crate::crypto::{aggregate_signatures, CanonicalBitSet, Signature, SignatureBytes};
use crate::error::Result;
use crate::quorum::stake_weight_exceeds_threshold;
use crate::types::{BitSetSignature, SignedMessage, UnsignedMessage};
use std::collections::{BTreeMap, BTreeSet};
use tracing::error;

#[derive(Clone, Debug, Default)]
pub struct AggregationState {
    signatures: BTreeMap<usize, SignatureBytes>,
    excluded: BTreeSet<usize>,
    accumulated_weight: u128,
}

impl AggregationState {
    pub fn new(excluded: BTreeSet<usize>) -> Self {
        Self {
            signatures: BTreeMap::new(),
            excluded,
            accumulated_weight: 0,
        }
    }

    /// Record a verified signature for canonical `index`.
    ///
    /// Returns false, leaving the state untouched, when the index is
    /// excluded or already present.
    pub fn insert(&mut self, index: usize, weight: u64, signature: SignatureBytes) -> bool {
        if self.excluded.contains(&index) || self.signatures.contains_key(&index) {
            return false;
        }
        self.signatures.insert(index, signature);
        self.accumulated_weight += weight as u128;
        true
    }

    pub fn contains(&self, index: usize) -> bool {
        self.signatures.contains_key(&index)
    }

    pub fn is_excluded(&self, index: usize) -> bool {
        self.excluded.contains(&index)
    }

    pub fn excluded(&self) -> &BTreeSet<usize> {
        &self.excluded
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn accumulated_weight(&self) -> u128 {
        self.accumulated_weight
    }

    pub fn signer_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.signatures.keys().copied()
    }

    pub fn exceeds_threshold(&self, total_weight: u64, quorum_pct: u64) -> bool {
        stake_weight_exceeds_threshold(self.accumulated_weight, total_weight, quorum_pct)
    }

    /// Build the signed message once accumulated weight clears `quorum_pct`.
    ///
    /// `Ok(None)` while the weight is short. Decoding or aggregation
    /// failures mean corrupted signature bytes and are returned as errors.
    pub fn aggregate_if_sufficient_weight(
        &self,
        message: &UnsignedMessage,
        total_weight: u64,
        quorum_pct: u64,
    ) -> Result<Option<SignedMessage>> {
        if !self.exceeds_threshold(total_weight, quorum_pct) {
            return Ok(None);
        }

        let (signature, signers) = self.aggregate().map_err(|e| {
            error!(
                "Failed to aggregate signatures for message {}: {}",
                message.id(),
                e
            );
            e
        })?;

        Ok(Some(SignedMessage {
            unsigned_message: message.clone(),
            signature: BitSetSignature {
                signers: signers.to_bytes(),
                signature: signature.to_bytes(),
            },
        }))
    }

    /// Aggregate in ascending canonical order so repeated calls over the
    /// same signatures yield identical bytes
    fn aggregate(&self) -> Result<(Signature, CanonicalBitSet)> {
        let mut signatures = Vec::with_capacity(self.signatures.len());
        let mut signers = CanonicalBitSet::new();
        for (&index, bytes) in &self.signatures {
            signatures.push(Signature::from_bytes(bytes)?);
            signers.add(index);
        }
        let aggregate = aggregate_signatures(&signatures)?;
        Ok((aggregate, signers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{sha256, CryptoError, SecretKey};
    use crate::error::AggregatorError;
    use proptest::prelude::*;

    #[test]
    fn test_excluded_index_never_enters() {
        let mut state = AggregationState::new([1].into_iter().collect());
        assert!(!state.insert(1, 50, [0u8; 96]));
        assert!(!state.contains(1));
        assert_eq!(state.accumulated_weight(), 0);

        assert!(state.insert(0, 10, [0u8; 96]));
        assert_eq!(state.accumulated_weight(), 10);
    }

    #[test]
    fn test_duplicate_index_counted_once() {
        let mut state = AggregationState::default();
        assert!(state.insert(3, 40, [1u8; 96]));
        assert!(!state.insert(3, 40, [2u8; 96]));
        assert_eq!(state.accumulated_weight(), 40);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_aggregate_below_threshold_is_none() {
        let message = UnsignedMessage::new(1, sha256(b"c"), b"m".to_vec()).unwrap();
        let sk = SecretKey::generate();
        let mut state = AggregationState::default();
        state.insert(0, 55, sk.sign(message.bytes()).to_bytes());

        assert!(state
            .aggregate_if_sufficient_weight(&message, 100, 67)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_aggregate_builds_bitset_in_canonical_order() {
        let message = UnsignedMessage::new(1, sha256(b"c"), b"m".to_vec()).unwrap();
        let keys: Vec<_> = (0..3).map(|_| SecretKey::generate()).collect();
        let mut state = AggregationState::default();
        state.insert(2, 35, keys[2].sign(message.bytes()).to_bytes());
        state.insert(0, 40, keys[0].sign(message.bytes()).to_bytes());

        let signed = state
            .aggregate_if_sufficient_weight(&message, 100, 70)
            .unwrap()
            .unwrap();
        let signers = signed.signers().unwrap();
        assert_eq!(signers.indices().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_corrupted_signature_is_hard_error() {
        let message = UnsignedMessage::new(1, sha256(b"c"), b"m".to_vec()).unwrap();
        let mut state = AggregationState::default();
        state.insert(0, 100, [0xffu8; 96]);

        let err = state
            .aggregate_if_sufficient_weight(&message, 100, 67)
            .unwrap_err();
        assert!(matches!(err, AggregatorError::Crypto(CryptoError::InvalidSignature)));
    }

    proptest! {
        /// Accumulated weight equals the sum over present indices regardless
        /// of insertion order, and no excluded index is ever present.
        #[test]
        fn prop_weight_is_order_independent(
            weights in proptest::collection::vec(1u64..1_000, 1..20),
            excluded_mask in proptest::collection::vec(any::<bool>(), 20),
            seed in any::<u64>(),
        ) {
            let excluded: BTreeSet<usize> = (0..weights.len())
                .filter(|i| excluded_mask[*i])
                .collect();

            let mut order: Vec<usize> = (0..weights.len()).collect();
            // Deterministic shuffle driven by the seed
            let mut s = seed;
            for i in (1..order.len()).rev() {
                s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                order.swap(i, (s >> 33) as usize % (i + 1));
            }

            let mut forward = AggregationState::new(excluded.clone());
            for i in 0..weights.len() {
                forward.insert(i, weights[i], [0u8; 96]);
            }
            let mut shuffled = AggregationState::new(excluded.clone());
            for &i in &order {
                shuffled.insert(i, weights[i], [0u8; 96]);
                // Duplicate deliveries change nothing
                shuffled.insert(i, weights[i], [0u8; 96]);
            }

            let expected: u128 = (0..weights.len())
                .filter(|i| !excluded.contains(i))
                .map(|i| weights[i] as u128)
                .sum();
            prop_assert_eq!(forward.accumulated_weight(), expected);
            prop_assert_eq!(shuffled.accumulated_weight(), expected);
            for i in shuffled.signer_indices() {
                prop_assert!(!excluded.contains(&i));
            }
        }
    }
}
