/// BLS signatures over BLS12-381 (min-pk variant)
///
/// Public keys live in G1 (48 bytes compressed), signatures in G2
/// (96 bytes compressed). Signatures from distinct signers over the same
/// message aggregate into one signature that verifies against the
/// aggregate of the signers' public keys.

use blst::min_pk::{
    AggregatePublicKey, AggregateSignature, PublicKey as BlstPublicKey,
    SecretKey as BlstSecretKey, Signature as BlstSignature,
};
use blst::BLST_ERROR;

use super::{CryptoError, Result};

pub const SIGNATURE_LEN: usize = 96;
pub const PUBLIC_KEY_LEN: usize = 48;
pub const SECRET_KEY_LEN: usize = 32;

/// Proof-of-possession ciphersuite tag
pub const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Compressed signature bytes
pub type SignatureBytes = [u8; SIGNATURE_LEN];

/// Compressed public key bytes
pub type PublicKeyBytes = [u8; PUBLIC_KEY_LEN];

/// BLS secret key
///
/// Only signers hold these; the aggregator itself never signs. Tests and
/// fixtures use them to stand in for validators.
#[derive(Clone)]
pub struct SecretKey {
    inner: BlstSecretKey,
}

impl SecretKey {
    /// Generate a new random secret key
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut ikm);
        Self::from_ikm(&ikm)
    }

    /// Derive a key from 32 bytes of input key material
    pub fn from_ikm(ikm: &[u8; 32]) -> Self {
        // key_gen only fails for ikm shorter than 32 bytes
        let inner = match BlstSecretKey::key_gen(ikm, &[]) {
            Ok(sk) => sk,
            Err(_) => unreachable!("32 bytes of key material is always accepted"),
        };
        Self { inner }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SECRET_KEY_LEN {
            return Err(CryptoError::InvalidLength {
                expected: SECRET_KEY_LEN,
                actual: bytes.len(),
            });
        }
        let inner = BlstSecretKey::from_bytes(bytes).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { inner })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.sk_to_pk(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            inner: self.inner.sign(message, DST, &[]),
        }
    }
}

/// BLS public key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    inner: BlstPublicKey,
}

impl PublicKey {
    /// Decode a compressed public key
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(CryptoError::InvalidLength {
                expected: PUBLIC_KEY_LEN,
                actual: bytes.len(),
            });
        }
        let inner = BlstPublicKey::key_validate(bytes).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { inner })
    }

    pub fn to_bytes(&self) -> PublicKeyBytes {
        self.inner.compress()
    }
}

/// BLS signature
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    inner: BlstSignature,
}

impl Signature {
    /// Decode a compressed signature.
    ///
    /// A byte string of the wrong length is a hard error, never a soft
    /// "no signature" result.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(CryptoError::InvalidLength {
                expected: SIGNATURE_LEN,
                actual: bytes.len(),
            });
        }
        let inner = BlstSignature::from_bytes(bytes).map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self { inner })
    }

    pub fn to_bytes(&self) -> SignatureBytes {
        self.inner.compress()
    }
}

/// Verify `signature` over `message` under `public_key`
pub fn verify(public_key: &PublicKey, signature: &Signature, message: &[u8]) -> bool {
    signature
        .inner
        .verify(true, message, DST, &[], &public_key.inner, true)
        == BLST_ERROR::BLST_SUCCESS
}

/// Combine signatures over one message into a single signature
pub fn aggregate_signatures(signatures: &[Signature]) -> Result<Signature> {
    if signatures.is_empty() {
        return Err(CryptoError::EmptyAggregation);
    }
    let refs: Vec<&BlstSignature> = signatures.iter().map(|s| &s.inner).collect();
    let aggregate = AggregateSignature::aggregate(&refs, true)
        .map_err(|e| CryptoError::AggregationFailed(format!("{:?}", e)))?;
    Ok(Signature {
        inner: aggregate.to_signature(),
    })
}

/// Combine public keys into the key an aggregate signature verifies against
pub fn aggregate_public_keys(public_keys: &[PublicKey]) -> Result<PublicKey> {
    if public_keys.is_empty() {
        return Err(CryptoError::EmptyAggregation);
    }
    let refs: Vec<&BlstPublicKey> = public_keys.iter().map(|pk| &pk.inner).collect();
    let aggregate = AggregatePublicKey::aggregate(&refs, false)
        .map_err(|e| CryptoError::AggregationFailed(format!("{:?}", e)))?;
    Ok(PublicKey {
        inner: aggregate.to_public_key(),
    })
}
