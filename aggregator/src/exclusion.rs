/// Exclusion of unfunded validators from balance-tracked groups
///
/// A signature from a canonical entry whose every node identity is below
/// the minimum balance cannot be verified by nodes that track activity, so
/// such entries are left out of the aggregate. Their weight still counts
/// towards the group total.

use crate::error::Result;
use crate::ledger::{GroupMetadata, LedgerClient, ValidatorBalance};
use crate::types::{ConnectedValidatorSet, GroupId, NodeId, PRIMARY_GROUP_ID};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct ExclusionFilter {
    ledger: Arc<dyn LedgerClient>,

    /// Group metadata, cached for the process lifetime
    metadata: RwLock<HashMap<GroupId, GroupMetadata>>,

    /// Balance snapshots, cached for the process lifetime
    balances: RwLock<HashMap<GroupId, Arc<Vec<ValidatorBalance>>>>,

    minimum_balance: u64,
}

impl ExclusionFilter {
    pub fn new(ledger: Arc<dyn LedgerClient>, minimum_balance: u64) -> Self {
        Self {
            ledger,
            metadata: RwLock::new(HashMap::new()),
            balances: RwLock::new(HashMap::new()),
            minimum_balance,
        }
    }

    /// Whether `group_id` tracks per-node balances.
    ///
    /// The primary group never does and is answered without the ledger.
    pub async fn is_balance_tracked(&self, group_id: GroupId) -> Result<bool> {
        if group_id == PRIMARY_GROUP_ID {
            return Ok(false);
        }
        Ok(self.group_metadata(group_id).await?.is_balance_tracked())
    }

    /// Canonical indices of `connected` to leave out of the aggregate
    pub async fn compute_exclusions(
        &self,
        group_id: GroupId,
        connected: &ConnectedValidatorSet,
    ) -> Result<BTreeSet<usize>> {
        if !self.is_balance_tracked(group_id).await? {
            return Ok(BTreeSet::new());
        }

        debug!("Checking balance-tracked group {} for unfunded nodes", group_id);
        let balances = self.validator_balances(group_id).await?;
        let unfunded = self.unfunded_nodes(&balances);

        let excluded = excluded_indices(connected, &unfunded);
        if !excluded.is_empty() {
            debug!(
                "Excluding {} of {} validators in group {}",
                excluded.len(),
                connected.validators().len(),
                group_id
            );
        }
        Ok(excluded)
    }

    /// Load the ledger caches for `group_id`.
    ///
    /// Failures are logged and otherwise ignored; the next aggregation will
    /// ask the ledger again.
    pub async fn prime(&self, group_id: GroupId) {
        match self.is_balance_tracked(group_id).await {
            Ok(true) => {
                if let Err(e) = self.validator_balances(group_id).await {
                    warn!("Failed to cache balances for group {}: {}", group_id, e);
                }
            }
            Ok(false) => {}
            Err(e) => warn!("Failed to cache metadata for group {}: {}", group_id, e),
        }
    }

    async fn group_metadata(&self, group_id: GroupId) -> Result<GroupMetadata> {
        if let Some(metadata) = self.metadata.read().await.get(&group_id) {
            return Ok(metadata.clone());
        }

        let metadata = self.ledger.group_metadata(group_id).await?;
        self.metadata
            .write()
            .await
            .insert(group_id, metadata.clone());
        Ok(metadata)
    }

    async fn validator_balances(&self, group_id: GroupId) -> Result<Arc<Vec<ValidatorBalance>>> {
        if let Some(balances) = self.balances.read().await.get(&group_id) {
            return Ok(Arc::clone(balances));
        }

        let balances = Arc::new(self.ledger.validator_balances(group_id).await?);
        self.balances
            .write()
            .await
            .insert(group_id, Arc::clone(&balances));
        Ok(balances)
    }

    fn unfunded_nodes(&self, balances: &[ValidatorBalance]) -> HashSet<NodeId> {
        balances
            .iter()
            .filter(|b| b.balance < self.minimum_balance)
            .inspect(|b| debug!("Node {} has insufficient balance {}", b.node_id, b.balance))
            .map(|b| b.node_id)
            .collect()
    }
}

/// An entry is excluded only when every one of its node identities is
/// unfunded. Identities the ledger does not list count as funded.
fn excluded_indices(connected: &ConnectedValidatorSet, unfunded: &HashSet<NodeId>) -> BTreeSet<usize> {
    connected
        .validators()
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.node_ids.is_empty() && v.node_ids.iter().all(|n| unfunded.contains(n)))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Id, SecretKey};
    use crate::ledger::LedgerError;
    use crate::types::{CanonicalValidator, CanonicalValidatorSet};
    use async_trait::async_trait;
    use libp2p::PeerId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticLedger {
        metadata: GroupMetadata,
        balances: Vec<ValidatorBalance>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LedgerClient for StaticLedger {
        async fn group_metadata(&self, _group_id: GroupId) -> crate::ledger::Result<GroupMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.metadata.clone())
        }

        async fn validator_balances(
            &self,
            group_id: GroupId,
        ) -> crate::ledger::Result<Vec<ValidatorBalance>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.balances.is_empty() {
                return Err(LedgerError::GroupNotFound(group_id));
            }
            Ok(self.balances.clone())
        }
    }

    fn l1_metadata() -> GroupMetadata {
        GroupMetadata {
            conversion_id: Some(Id::new([7u8; 32])),
        }
    }

    fn connected(entries: Vec<Vec<NodeId>>) -> ConnectedValidatorSet {
        let validators: Vec<_> = entries
            .into_iter()
            .map(|nodes| CanonicalValidator::new(SecretKey::generate().public_key(), 10, nodes))
            .collect();
        let all_nodes = validators.iter().flat_map(|v| v.node_ids.clone()).collect();
        ConnectedValidatorSet::new(CanonicalValidatorSet::new(validators), all_nodes)
    }

    #[tokio::test]
    async fn test_only_fully_unfunded_entries_are_excluded() {
        let (a1, a2, b1, c1) = (PeerId::random(), PeerId::random(), PeerId::random(), PeerId::random());
        let set = connected(vec![vec![a1, a2], vec![b1], vec![c1]]);

        let ledger = Arc::new(StaticLedger {
            metadata: l1_metadata(),
            balances: vec![
                ValidatorBalance { node_id: a1, balance: 0 },
                ValidatorBalance { node_id: a2, balance: 5_000 },
                ValidatorBalance { node_id: b1, balance: 2_047 },
                // c1 is not listed at all
            ],
            calls: AtomicUsize::new(0),
        });
        let filter = ExclusionFilter::new(ledger, 2_048);

        let excluded = filter.compute_exclusions(Id::new([1u8; 32]), &set).await.unwrap();
        assert_eq!(excluded.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_primary_group_skips_ledger() {
        let ledger = Arc::new(StaticLedger {
            metadata: l1_metadata(),
            balances: vec![],
            calls: AtomicUsize::new(0),
        });
        let filter = ExclusionFilter::new(ledger.clone(), 2_048);
        let set = connected(vec![vec![PeerId::random()]]);

        let excluded = filter.compute_exclusions(PRIMARY_GROUP_ID, &set).await.unwrap();
        assert!(excluded.is_empty());
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_legacy_group_excludes_nothing() {
        let node = PeerId::random();
        let ledger = Arc::new(StaticLedger {
            metadata: GroupMetadata::default(),
            balances: vec![ValidatorBalance { node_id: node, balance: 0 }],
            calls: AtomicUsize::new(0),
        });
        let filter = ExclusionFilter::new(ledger, 2_048);

        let excluded = filter
            .compute_exclusions(Id::new([1u8; 32]), &connected(vec![vec![node]]))
            .await
            .unwrap();
        assert!(excluded.is_empty());
    }

    #[tokio::test]
    async fn test_ledger_lookups_are_cached() {
        let node = PeerId::random();
        let ledger = Arc::new(StaticLedger {
            metadata: l1_metadata(),
            balances: vec![ValidatorBalance { node_id: node, balance: 0 }],
            calls: AtomicUsize::new(0),
        });
        let filter = ExclusionFilter::new(ledger.clone(), 2_048);
        let set = connected(vec![vec![node]]);
        let group = Id::new([1u8; 32]);

        filter.compute_exclusions(group, &set).await.unwrap();
        filter.compute_exclusions(group, &set).await.unwrap();
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ledger_failure_propagates() {
        let ledger = Arc::new(StaticLedger {
            metadata: l1_metadata(),
            balances: vec![],
            calls: AtomicUsize::new(0),
        });
        let filter = ExclusionFilter::new(ledger, 2_048);
        let set = connected(vec![vec![PeerId::random()]]);

        let err = filter
            .compute_exclusions(Id::new([1u8; 32]), &set)
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }
}
