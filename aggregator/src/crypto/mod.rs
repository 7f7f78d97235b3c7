/// Cryptography for signature aggregation
///
/// Implements:
/// - BLS signatures (verification, aggregation, fixed-length decoding)
/// - Canonical signer bitsets
/// - SHA-256 identifiers

pub mod bitset;
pub mod bls;
pub mod hash;

use thiserror::Error;

pub use bitset::CanonicalBitSet;
pub use bls::{
    aggregate_public_keys, aggregate_signatures, verify, PublicKey, PublicKeyBytes, SecretKey,
    Signature, SignatureBytes, PUBLIC_KEY_LEN, SIGNATURE_LEN,
};
pub use hash::{sha256, Id};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Invalid public key")]
    InvalidKey,
    #[error("Nothing to aggregate")]
    EmptyAggregation,
    #[error("Aggregation failed: {0}")]
    AggregationFailed(String),
    #[error("Invalid bitset: {0}")]
    InvalidBitSet(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
