//! # Signature Cache
//!
//! Bounded LRU store of verified signatures keyed by message, then by
//! the signer's compressed public key. Shared by every concurrent
//! aggregation; a miss only means the network has to be asked.

use crate::crypto::{PublicKeyBytes, SignatureBytes};
use crate::types::MessageId;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Signature cache size must be greater than zero")]
    ZeroCapacity,
}

/// Signatures collected for one message
pub type MessageSignatures = HashMap<PublicKeyBytes, SignatureBytes>;

pub struct SignatureCache {
    /// Capacity counts messages, not signatures
    signatures: Mutex<LruCache<MessageId, MessageSignatures>>,
}

impl SignatureCache {
    pub fn new(size: usize) -> Result<Self, CacheError> {
        let capacity = NonZeroUsize::new(size).ok_or(CacheError::ZeroCapacity)?;
        Ok(Self {
            signatures: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// All cached signatures for `message_id`
    pub fn get(&self, message_id: &MessageId) -> Option<MessageSignatures> {
        self.signatures.lock().get(message_id).cloned()
    }

    /// Record a verified signature
    pub fn add(&self, message_id: MessageId, public_key: PublicKeyBytes, signature: SignatureBytes) {
        let mut signatures = self.signatures.lock();
        match signatures.get_mut(&message_id) {
            Some(entry) => {
                entry.insert(public_key, signature);
            }
            None => {
                let mut entry = HashMap::new();
                entry.insert(public_key, signature);
                signatures.put(message_id, entry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.signatures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
