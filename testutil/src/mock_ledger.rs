/// In-memory ledger
///
/// Groups are legacy (not balance tracked) unless marked as L1. Call
/// counters let tests check the per-group caching.

use async_trait::async_trait;
use parking_lot::Mutex;
use signature_aggregator::crypto::Id;
use signature_aggregator::ledger::{
    GroupMetadata, LedgerClient, LedgerError, Result, ValidatorBalance,
};
use signature_aggregator::{GroupId, NodeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct MockLedger {
    metadata: Mutex<HashMap<GroupId, GroupMetadata>>,
    balances: Mutex<HashMap<GroupId, Vec<ValidatorBalance>>>,
    metadata_calls: AtomicUsize,
    balance_calls: AtomicUsize,
    failing: AtomicBool,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `group_id` as converted to a balance-tracked group
    pub fn set_l1(&self, group_id: GroupId, conversion_id: Id) {
        self.metadata.lock().insert(
            group_id,
            GroupMetadata {
                conversion_id: Some(conversion_id),
            },
        );
    }

    pub fn set_balance(&self, group_id: GroupId, node_id: NodeId, balance: u64) {
        let mut balances = self.balances.lock();
        let entries = balances.entry(group_id).or_default();
        entries.retain(|b| b.node_id != node_id);
        entries.push(ValidatorBalance { node_id, balance });
    }

    /// Make every subsequent call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::RequestFailed("ledger unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn group_metadata(&self, group_id: GroupId) -> Result<GroupMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self
            .metadata
            .lock()
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn validator_balances(&self, group_id: GroupId) -> Result<Vec<ValidatorBalance>> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self
            .balances
            .lock()
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }
}
