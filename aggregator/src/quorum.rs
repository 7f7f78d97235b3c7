/// Weighted quorum arithmetic
///
/// Thresholds are whole percentages of total weight. A weight `w` clears
/// `pct` of `total` when `w * 100 >= total * pct`, evaluated in 128-bit
/// integers so no realistic weight overflows.

use crate::error::{AggregatorError, Result};

pub const DEFAULT_REQUIRED_QUORUM_PCT: u64 = 67;
pub const DEFAULT_QUORUM_BUFFER_PCT: u64 = 3;

/// True when `accumulated` is at least `quorum_pct` percent of `total`
pub fn stake_weight_exceeds_threshold(accumulated: u128, total: u64, quorum_pct: u64) -> bool {
    accumulated * 100 >= total as u128 * quorum_pct as u128
}

/// Validated pair of quorum percentages for one aggregation call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuorumParams {
    required_pct: u64,
    buffer_pct: u64,
}

impl QuorumParams {
    /// Rejects a zero requirement and any pair summing past 100
    pub fn new(required_pct: u64, buffer_pct: u64) -> Result<Self> {
        let total = required_pct.checked_add(buffer_pct);
        if required_pct == 0 || total.map_or(true, |t| t > 100) {
            return Err(AggregatorError::InvalidQuorumPercentage {
                required: required_pct,
                buffer: buffer_pct,
            });
        }
        Ok(Self {
            required_pct,
            buffer_pct,
        })
    }

    /// Bare minimum a signed message must clear
    pub fn required_pct(&self) -> u64 {
        self.required_pct
    }

    pub fn buffer_pct(&self) -> u64 {
        self.buffer_pct
    }

    /// Threshold at which collection stops early
    pub fn buffered_pct(&self) -> u64 {
        self.required_pct + self.buffer_pct
    }
}

impl Default for QuorumParams {
    fn default() -> Self {
        Self {
            required_pct: DEFAULT_REQUIRED_QUORUM_PCT,
            buffer_pct: DEFAULT_QUORUM_BUFFER_PCT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundaries() {
        assert!(stake_weight_exceeds_threshold(67, 100, 67));
        assert!(!stake_weight_exceeds_threshold(66, 100, 67));
        assert!(stake_weight_exceeds_threshold(70, 100, 70));
        // 2/3 of 3 is 66.6%
        assert!(!stake_weight_exceeds_threshold(2, 3, 67));
        assert!(stake_weight_exceeds_threshold(0, 0, 67));
    }

    #[test]
    fn test_threshold_does_not_overflow() {
        let total = u64::MAX;
        assert!(stake_weight_exceeds_threshold(u64::MAX as u128, total, 100));
        assert!(!stake_weight_exceeds_threshold(u64::MAX as u128 / 2, total, 67));
    }

    #[test]
    fn test_quorum_params_validation() {
        assert!(QuorumParams::new(67, 3).is_ok());
        assert!(QuorumParams::new(100, 0).is_ok());
        assert!(matches!(
            QuorumParams::new(0, 3),
            Err(AggregatorError::InvalidQuorumPercentage { required: 0, buffer: 3 })
        ));
        assert!(QuorumParams::new(98, 3).is_err());
        assert!(QuorumParams::new(u64::MAX, 1).is_err());
    }

    #[test]
    fn test_buffered_threshold() {
        let params = QuorumParams::default();
        assert_eq!(params.required_pct(), 67);
        assert_eq!(params.buffer_pct(), 3);
        assert_eq!(params.buffered_pct(), 70);
    }
}
