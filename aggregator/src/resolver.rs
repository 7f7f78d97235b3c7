// Validator set resolution
//
// Resolves a group to its canonical validators and current connectivity.
// Snapshots are cached per group and reused while their connected weight
// still clears the caller's quorum; otherwise the transport is asked again
// under a bounded retry loop. Source-chain to group lookups are cached the
// same way.

use crate::error::{AggregatorError, Result};
use crate::network::{AppRequestNetwork, NetworkError};
use crate::retry::{with_retries_timeout, RetryPolicy};
use crate::types::{ChainId, ConnectedValidatorSet, GroupId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct ValidatorSetResolver {
    network: Arc<dyn AppRequestNetwork>,

    /// Last successful connectivity snapshot per group
    connected_sets: RwLock<HashMap<GroupId, Arc<ConnectedValidatorSet>>>,

    /// Group owning each source chain
    source_groups: RwLock<HashMap<ChainId, GroupId>>,

    retry_policy: RetryPolicy,
    connect_timeout: Duration,
}

impl ValidatorSetResolver {
    pub fn new(
        network: Arc<dyn AppRequestNetwork>,
        retry_policy: RetryPolicy,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            network,
            connected_sets: RwLock::new(HashMap::new()),
            source_groups: RwLock::new(HashMap::new()),
            retry_policy,
            connect_timeout,
        }
    }

    /// Connected validators of `group_id` holding at least `quorum_pct` of
    /// its weight.
    ///
    /// A cached snapshot that still clears the quorum is returned without
    /// touching the transport. Fails with `InsufficientConnectedStake` once
    /// the retry ceiling passes.
    pub async fn resolve(
        &self,
        group_id: GroupId,
        quorum_pct: u64,
    ) -> Result<Arc<ConnectedValidatorSet>> {
        if let Some(cached) = self.connected_sets.read().await.get(&group_id) {
            if cached.has_quorum(quorum_pct) {
                debug!("Using cached connectivity for group {}", group_id);
                return Ok(Arc::clone(cached));
            }
        }

        let connected = with_retries_timeout(
            "Connect to validator set",
            &self.retry_policy,
            self.connect_timeout,
            move || async move { self.fetch_connected(group_id, quorum_pct).await },
        )
        .await?;

        self.connected_sets
            .write()
            .await
            .insert(group_id, Arc::clone(&connected));
        Ok(connected)
    }

    /// One connectivity probe
    async fn fetch_connected(
        &self,
        group_id: GroupId,
        quorum_pct: u64,
    ) -> Result<Arc<ConnectedValidatorSet>> {
        self.network.track_group(group_id);
        let connected = self.network.connected_canonical_validators(group_id).await?;

        info!(
            "Group {} connected stake: {:.2}% ({} of {})",
            group_id,
            connected.connected_percentage(),
            connected.connected_weight,
            connected.total_weight()
        );

        if !connected.has_quorum(quorum_pct) {
            warn!(
                "Failed to connect to a threshold of stake for group {}: {} of {}, need {}%",
                group_id,
                connected.connected_weight,
                connected.total_weight(),
                quorum_pct
            );
            return Err(AggregatorError::InsufficientConnectedStake {
                connected: connected.connected_weight,
                total: connected.total_weight(),
                quorum_pct,
            });
        }

        Ok(Arc::new(connected))
    }

    /// Group that owns `chain_id`
    pub async fn source_group(&self, chain_id: ChainId) -> Result<GroupId> {
        if let Some(group_id) = self.source_groups.read().await.get(&chain_id) {
            return Ok(*group_id);
        }

        let group_id = match self.network.group_for_chain(chain_id).await {
            Ok(group_id) => group_id,
            Err(NetworkError::UnknownChain(_)) => {
                return Err(AggregatorError::SourceGroupNotFound(chain_id))
            }
            Err(e) => {
                warn!("Failed to look up group for chain {}: {}", chain_id, e);
                return Err(AggregatorError::SourceGroupNotFound(chain_id));
            }
        };

        debug!("Chain {} belongs to group {}", chain_id, group_id);
        self.source_groups.write().await.insert(chain_id, group_id);
        Ok(group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Id, SecretKey};
    use crate::network::{InboundResponse, NetworkResult, OutboundRequest, RequestId};
    use crate::types::{CanonicalValidator, CanonicalValidatorSet, NodeId};
    use async_trait::async_trait;
    use libp2p::PeerId;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Serves a fixed validator set with a switchable connected node set
    struct StaticNetwork {
        set: CanonicalValidatorSet,
        connected: parking_lot::Mutex<HashSet<NodeId>>,
        chain: ChainId,
        group: GroupId,
        fetches: AtomicUsize,
        lookups: AtomicUsize,
    }

    impl StaticNetwork {
        fn new(weights: &[u64]) -> Self {
            let set = CanonicalValidatorSet::new(
                weights
                    .iter()
                    .map(|w| {
                        CanonicalValidator::new(
                            SecretKey::generate().public_key(),
                            *w,
                            vec![PeerId::random()],
                        )
                    })
                    .collect(),
            );
            let connected = set.validators.iter().flat_map(|v| v.node_ids.clone()).collect();
            Self {
                set,
                connected: parking_lot::Mutex::new(connected),
                chain: Id::new([1u8; 32]),
                group: Id::new([2u8; 32]),
                fetches: AtomicUsize::new(0),
                lookups: AtomicUsize::new(0),
            }
        }

        fn disconnect(&self, index: usize) {
            let mut connected = self.connected.lock();
            for node_id in &self.set.validators[index].node_ids {
                connected.remove(node_id);
            }
        }
    }

    #[async_trait]
    impl AppRequestNetwork for StaticNetwork {
        fn track_group(&self, _group_id: GroupId) {}

        async fn connected_canonical_validators(
            &self,
            _group_id: GroupId,
        ) -> NetworkResult<ConnectedValidatorSet> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let connected = self.connected.lock().clone();
            Ok(ConnectedValidatorSet::new(self.set.clone(), connected))
        }

        async fn group_for_chain(&self, chain_id: ChainId) -> NetworkResult<GroupId> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if chain_id == self.chain {
                Ok(self.group)
            } else {
                Err(NetworkError::UnknownChain(chain_id))
            }
        }

        fn register_request_wave(
            &self,
            _request_id: RequestId,
            expected_responses: usize,
        ) -> mpsc::Receiver<InboundResponse> {
            mpsc::channel(expected_responses.max(1)).1
        }

        fn release_request_wave(&self, _request_id: RequestId) {}

        fn register_timeout(&self, _request_id: RequestId, _node_id: NodeId) {}

        async fn send(
            &self,
            _request: &OutboundRequest,
            _targets: &HashSet<NodeId>,
            _source_group: GroupId,
        ) -> HashSet<NodeId> {
            HashSet::new()
        }
    }

    fn resolver(network: Arc<StaticNetwork>) -> ValidatorSetResolver {
        ValidatorSetResolver::new(
            network,
            RetryPolicy {
                initial_interval: Duration::from_millis(5),
                max_interval: Duration::from_millis(20),
            },
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn test_cached_set_reused_while_quorum_holds() {
        let network = Arc::new(StaticNetwork::new(&[40, 35, 15, 10]));
        let resolver = resolver(network.clone());
        let group = network.group;

        resolver.resolve(group, 67).await.unwrap();
        network.disconnect(3);
        // Still 100 connected in the cached snapshot
        let connected = resolver.resolve(group, 67).await.unwrap();

        assert_eq!(connected.connected_weight, 100);
        assert_eq!(network.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refetch_when_cached_set_falls_short() {
        let network = Arc::new(StaticNetwork::new(&[40, 35, 15, 10]));
        let resolver = resolver(network.clone());
        let group = network.group;

        network.disconnect(2);
        let first = resolver.resolve(group, 67).await.unwrap();
        assert_eq!(first.connected_weight, 85);

        // A stricter caller forces a fresh probe
        network.disconnect(3);
        let err = resolver.resolve(group, 90).await.unwrap_err();

        assert!(matches!(
            err,
            AggregatorError::InsufficientConnectedStake {
                connected: 75,
                total: 100,
                quorum_pct: 90
            }
        ));
        assert!(network.fetches.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_source_group_lookup_is_cached() {
        let network = Arc::new(StaticNetwork::new(&[100]));
        let resolver = resolver(network.clone());

        assert_eq!(resolver.source_group(network.chain).await.unwrap(), network.group);
        assert_eq!(resolver.source_group(network.chain).await.unwrap(), network.group);
        assert_eq!(network.lookups.load(Ordering::SeqCst), 1);

        let unknown = Id::new([9u8; 32]);
        assert!(matches!(
            resolver.source_group(unknown).await,
            Err(AggregatorError::SourceGroupNotFound(c)) if c == unknown
        ));
    }
}
