/// 32-byte identifiers for messages, chains and validator groups
///
/// Message identifiers are the SHA-256 digest of the message's canonical bytes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::CryptoError;

pub const ID_LEN: usize = 32;

/// Opaque 32-byte identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Id([u8; ID_LEN]);

impl Id {
    /// The all-zero identifier
    pub const EMPTY: Id = Id([0u8; ID_LEN]);

    pub const fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        if slice.len() != ID_LEN {
            return Err(CryptoError::InvalidLength {
                expected: ID_LEN,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; ID_LEN]
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", hex::encode(&self.0[..8]))
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// SHA-256 digest of `data`
pub fn sha256(data: &[u8]) -> Id {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Id::new(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc")
        let id = sha256(b"abc");
        assert_eq!(
            id.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_from_slice_rejects_wrong_size() {
        assert!(Id::from_slice(&[1u8; 31]).is_err());
        assert!(Id::from_slice(&[1u8; 33]).is_err());
        assert_eq!(Id::from_slice(&[7u8; 32]).unwrap(), Id::new([7u8; 32]));
    }

    #[test]
    fn test_empty_id() {
        assert!(Id::EMPTY.is_empty());
        assert!(Id::default().is_empty());
        assert!(!sha256(b"x").is_empty());
    }
}
