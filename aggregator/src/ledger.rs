/// Ledger collaborator
///
/// The ledger knows which groups track per-node balances (L1 groups,
/// marked by a conversion identifier) and what each node's balance is.

use crate::crypto::Id;
use crate::types::{GroupId, NodeId};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),
    #[error("Ledger request failed: {0}")]
    RequestFailed(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Group metadata as reported by the ledger
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupMetadata {
    /// Set once a legacy group has been converted to a balance-tracked one
    pub conversion_id: Option<Id>,
}

impl GroupMetadata {
    pub fn is_balance_tracked(&self) -> bool {
        self.conversion_id.map_or(false, |id| !id.is_empty())
    }
}

/// Current balance of one node identity in a balance-tracked group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorBalance {
    pub node_id: NodeId,
    pub balance: u64,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn group_metadata(&self, group_id: GroupId) -> Result<GroupMetadata>;

    async fn validator_balances(&self, group_id: GroupId) -> Result<Vec<ValidatorBalance>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_tracking_follows_conversion() {
        assert!(!GroupMetadata::default().is_balance_tracked());
        assert!(!GroupMetadata {
            conversion_id: Some(Id::EMPTY)
        }
        .is_balance_tracked());
        assert!(GroupMetadata {
            conversion_id: Some(Id::new([1u8; 32]))
        }
        .is_balance_tracked());
    }
}
