/// Weighted BLS signature aggregation
///
/// Collects enough individual validator signatures over a message to build
/// one aggregate signature plus a canonical signer bitset:
/// - Weighted quorum with a hard minimum and an early-exit buffer
/// - Exclusion of unfunded validators in balance-tracked groups
/// - LRU signature cache consulted before any network traffic
/// - Request waves correlated by request id, with per-node timeouts
/// - Bounded retry with backoff around connectivity and collection

pub mod aggregator;
pub mod cache;
pub mod collector;
pub mod config;
pub mod crypto;
pub mod error;
pub mod exclusion;
pub mod ledger;
pub mod network;
pub mod quorum;
pub mod resolver;
pub mod retry;
pub mod state;
pub mod types;

pub use aggregator::SignatureAggregator;
pub use config::AggregatorConfig;
pub use error::{AggregatorError, Result};
pub use types::{
    CanonicalValidator, CanonicalValidatorSet, ChainId, ConnectedValidatorSet, GroupId,
    MessageError, MessageId, NodeId, SignedMessage, UnsignedMessage, PRIMARY_GROUP_ID,
};
