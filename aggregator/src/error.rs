/// Errors surfaced by signature aggregation

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::ledger::LedgerError;
use crate::network::NetworkError;
use crate::types::{ChainId, MessageError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("Invalid total quorum percentage: required {required}, buffer {buffer}")]
    InvalidQuorumPercentage { required: u64, buffer: u64 },

    #[error("Failed to connect to a threshold of stake: connected {connected} of {total}, need {quorum_pct}%")]
    InsufficientConnectedStake {
        connected: u64,
        total: u64,
        quorum_pct: u64,
    },

    #[error("Failed to collect a threshold of signatures: collected {accumulated} of {total}, need {quorum_pct}%")]
    InsufficientSignatures {
        accumulated: u128,
        total: u64,
        quorum_pct: u64,
    },

    #[error("Source message group not found for chain {0}")]
    SourceGroupNotFound(ChainId),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl AggregatorError {
    /// Whether retrying the failed step can possibly help.
    ///
    /// Stake and signature shortfalls and collaborator hiccups are
    /// transient; configuration, decoding and aggregation failures are not.
    pub fn is_permanent(&self) -> bool {
        !matches!(
            self,
            AggregatorError::InsufficientConnectedStake { .. }
                | AggregatorError::InsufficientSignatures { .. }
                | AggregatorError::Network(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
