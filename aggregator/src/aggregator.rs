//! # Signature Aggregator
//!
//! Public entry point. For one message it:
//! - resolves the signing group and waits for a quorum of connected stake
//! - works out which canonical entries must stay out of the aggregate
//! - seeds the aggregate from cached signatures
//! - runs request waves until `required + buffer` clears, accepting the
//!   bare `required` once a wave is exhausted
//!
//! Both the connectivity step and the collection step run under a bounded
//! retry loop.

use crate::cache::SignatureCache;
use crate::collector::RequestCollector;
use crate::config::AggregatorConfig;
use crate::error::{AggregatorError, Result};
use crate::exclusion::ExclusionFilter;
use crate::ledger::LedgerClient;
use crate::network::AppRequestNetwork;
use crate::quorum::QuorumParams;
use crate::resolver::ValidatorSetResolver;
use crate::retry::with_retries_timeout;
use crate::state::AggregationState;
use crate::types::{ConnectedValidatorSet, GroupId, SignedMessage, UnsignedMessage};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct SignatureAggregator {
    network: Arc<dyn AppRequestNetwork>,
    resolver: ValidatorSetResolver,
    exclusions: ExclusionFilter,
    cache: Arc<SignatureCache>,
    collector: RequestCollector,
    config: AggregatorConfig,
}

impl SignatureAggregator {
    pub fn new(
        network: Arc<dyn AppRequestNetwork>,
        ledger: Arc<dyn LedgerClient>,
        config: AggregatorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(SignatureCache::new(config.signature_cache_size)?);

        Ok(Self {
            resolver: ValidatorSetResolver::new(
                Arc::clone(&network),
                config.retry_policy(),
                config.connect_timeout(),
            ),
            exclusions: ExclusionFilter::new(ledger, config.minimum_l1_validator_balance),
            collector: RequestCollector::new(
                Arc::clone(&network),
                Arc::clone(&cache),
                config.app_request_timeout(),
            ),
            cache,
            network,
            config,
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn signature_cache(&self) -> &SignatureCache {
        &self.cache
    }

    /// Connect to each group ahead of time and prime the ledger caches.
    ///
    /// Fails on the first group that cannot reach `quorum_pct` of connected
    /// stake. Ledger failures are only logged.
    pub async fn initialize_group_connections(
        &self,
        group_ids: &[GroupId],
        quorum_pct: u64,
    ) -> Result<()> {
        for group_id in group_ids {
            info!("Pre-connecting to validators of group {}", group_id);
            self.network.track_group(*group_id);
            self.resolver.resolve(*group_id, quorum_pct).await?;
            self.exclusions.prime(*group_id).await;
        }
        Ok(())
    }

    /// Collect a threshold of signatures over `message` and aggregate them.
    ///
    /// `signing_group` defaults to the group owning the message's source
    /// chain. `None` quorum percentages take the configured defaults.
    pub async fn create_signed_message(
        &self,
        message: &UnsignedMessage,
        justification: &[u8],
        signing_group: Option<GroupId>,
        required_quorum_pct: Option<u64>,
        quorum_buffer_pct: Option<u64>,
    ) -> Result<SignedMessage> {
        let quorum = quorum_params(&self.config, required_quorum_pct, quorum_buffer_pct)?;

        debug!("Creating signed message {}", message.id());
        let source_group = self.resolver.source_group(message.source_chain_id()).await?;
        let signing_group = signing_group.unwrap_or(source_group);
        debug!(
            "Signing message {} with group {}",
            message.id(),
            signing_group
        );

        let connected = self
            .resolver
            .resolve(signing_group, quorum.required_pct())
            .await?;

        let excluded = self
            .exclusions
            .compute_exclusions(signing_group, &connected)
            .await?;
        let mut state = AggregationState::new(excluded);

        self.seed_from_cache(message, &connected, &mut state);
        if let Some(signed) = state.aggregate_if_sufficient_weight(
            message,
            connected.total_weight(),
            quorum.buffered_pct(),
        )? {
            info!(
                "Created signed message {} from cached signatures",
                message.id()
            );
            return Ok(signed);
        }

        self.collect(message, justification, &connected, source_group, state, quorum)
            .await
    }

    /// Forward shutdown to the transport
    pub fn shutdown(&self) {
        self.network.shutdown();
    }

    /// Apply cached signatures; excluded entries are skipped
    fn seed_from_cache(
        &self,
        message: &UnsignedMessage,
        connected: &ConnectedValidatorSet,
        state: &mut AggregationState,
    ) {
        let Some(cached) = self.cache.get(&message.id()) else {
            debug!("No cached signatures for message {}", message.id());
            return;
        };

        for (index, validator) in connected.validators().iter().enumerate() {
            if let Some(signature) = cached.get(&validator.public_key_bytes) {
                state.insert(index, validator.weight, *signature);
            }
        }
        debug!(
            "Signature cache hits for message {}: {}, misses: {}",
            message.id(),
            state.len(),
            connected.validators().len() - state.len()
        );
    }

    async fn collect(
        &self,
        message: &UnsignedMessage,
        justification: &[u8],
        connected: &ConnectedValidatorSet,
        source_group: GroupId,
        state: AggregationState,
        quorum: QuorumParams,
    ) -> Result<SignedMessage> {
        let state = Mutex::new(state);
        let state = &state;

        let result = with_retries_timeout(
            "Collect signatures",
            &self.config.retry_policy(),
            self.config.signature_request_timeout(),
            move || {
                self.collection_attempt(message, justification, connected, source_group, state, quorum)
            },
        )
        .await;

        if let Err(e) = &result {
            warn!(
                "Failed to collect a threshold of signatures for message {}: {}",
                message.id(),
                e
            );
        }
        result
    }

    /// One request wave, then the bare-requirement fallback
    async fn collection_attempt(
        &self,
        message: &UnsignedMessage,
        justification: &[u8],
        connected: &ConnectedValidatorSet,
        source_group: GroupId,
        state: &Mutex<AggregationState>,
        quorum: QuorumParams,
    ) -> Result<SignedMessage> {
        let mut state = state.lock().await;
        let total_weight = connected.total_weight();

        if let Some(signed) = self
            .collector
            .collect(
                message,
                justification,
                connected,
                source_group,
                &mut state,
                quorum.buffered_pct(),
            )
            .await?
        {
            return Ok(signed);
        }

        // Wave exhausted short of the buffer; the bare requirement will do
        match state.aggregate_if_sufficient_weight(message, total_weight, quorum.required_pct())? {
            Some(signed) => {
                info!(
                    "Created signed message {} at the required threshold with weight {} of {}",
                    message.id(),
                    state.accumulated_weight(),
                    total_weight
                );
                Ok(signed)
            }
            None => Err(AggregatorError::InsufficientSignatures {
                accumulated: state.accumulated_weight(),
                total: total_weight,
                quorum_pct: quorum.required_pct(),
            }),
        }
    }
}

/// Fill unset percentages from the config and validate the pair
fn quorum_params(
    config: &AggregatorConfig,
    required_quorum_pct: Option<u64>,
    quorum_buffer_pct: Option<u64>,
) -> Result<QuorumParams> {
    QuorumParams::new(
        required_quorum_pct.unwrap_or(config.default_required_quorum_pct),
        quorum_buffer_pct.unwrap_or(config.default_quorum_buffer_pct),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_defaults_fill_unset_values() {
        let config = AggregatorConfig::default();
        let quorum = quorum_params(&config, None, None).unwrap();
        assert_eq!(quorum.required_pct(), 67);
        assert_eq!(quorum.buffer_pct(), 3);

        let quorum = quorum_params(&config, Some(80), None).unwrap();
        assert_eq!(quorum.buffered_pct(), 83);

        let quorum = quorum_params(&config, None, Some(0)).unwrap();
        assert_eq!(quorum.buffered_pct(), 67);
    }

    #[test]
    fn test_quorum_overrides_are_validated() {
        let config = AggregatorConfig::default();
        assert!(matches!(
            quorum_params(&config, Some(0), None),
            Err(AggregatorError::InvalidQuorumPercentage { .. })
        ));
        assert!(matches!(
            quorum_params(&config, Some(98), Some(3)),
            Err(AggregatorError::InvalidQuorumPercentage { required: 98, buffer: 3 })
        ));
        assert!(quorum_params(&config, Some(100), Some(0)).is_ok());
    }
}
