/// Test data generators

use rand::Rng;
use signature_aggregator::crypto::Id;
use signature_aggregator::UnsignedMessage;

/// Generate random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

/// Generate a random non-empty identifier
pub fn random_id() -> Id {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    bytes[0] |= 1;
    Id::new(bytes)
}

/// Generate random message for testing
pub fn random_message(source_chain_id: Id) -> UnsignedMessage {
    UnsignedMessage::new(1, source_chain_id, random_bytes(64)).expect("64-byte payload")
}

