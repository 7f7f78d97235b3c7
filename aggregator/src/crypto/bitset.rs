/// Canonical signer bitset
///
/// Bit `i` is set when canonical validator `i` contributed to an aggregate
/// signature. The wire form is the minimal big-endian encoding of the
/// integer whose bits are the set indices, so bit 0 lives in the lowest
/// bit of the last byte and an empty set encodes to no bytes at all.

use std::collections::BTreeSet;

use super::{CryptoError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CanonicalBitSet {
    indices: BTreeSet<usize>,
}

impl CanonicalBitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, index: usize) {
        self.indices.insert(index);
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of bits needed to hold the highest set index
    pub fn bit_len(&self) -> usize {
        self.indices.iter().next_back().map_or(0, |max| max + 1)
    }

    /// Set indices in ascending order
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let byte_len = (self.bit_len() + 7) / 8;
        let mut bytes = vec![0u8; byte_len];
        for &i in &self.indices {
            bytes[byte_len - 1 - i / 8] |= 1 << (i % 8);
        }
        bytes
    }

    /// Decode a bitset, rejecting non-minimal encodings
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.first() == Some(&0) {
            return Err(CryptoError::InvalidBitSet(
                "bitset has leading zero bytes".into(),
            ));
        }
        let mut set = Self::new();
        let len = bytes.len();
        for (pos, byte) in bytes.iter().enumerate() {
            let base = (len - 1 - pos) * 8;
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    set.add(base + bit);
                }
            }
        }
        Ok(set)
    }
}

impl FromIterator<usize> for CanonicalBitSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        Self {
            indices: iter.into_iter().collect(),
        }
    }
}
