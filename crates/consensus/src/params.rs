//! Consensus parameters and their validity contract.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Safety buffer for the minimum-connected-stake health threshold.
/// This increases the required percentage above alpha/k. Must be in [0, 1].
/// 0 means min_percent_connected = alpha/k.
/// 1 means min_percent_connected = 1 (fully connected).
pub const MIN_PERCENT_CONNECTED_BUFFER: f64 = 0.2;

/// Parameter validation failure. The chain refuses to start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parameters invalid: {0}")]
pub struct ParametersError(pub String);

/// Parameters required for snowball consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    /// Number of nodes to query and sample in a round.
    pub k: usize,

    /// Vote threshold to change your preference.
    pub alpha_preference: u64,

    /// Vote threshold to increase your confidence.
    pub alpha_confidence: u64,

    /// Consecutive successful queries required for finalization on a
    /// virtuous (never-conflicted) block.
    pub beta_virtuous: u32,

    /// Consecutive successful queries required for finalization on a rogue
    /// (conflicted) block.
    pub beta_rogue: u32,

    /// Number of outstanding polls the engine targets while something is
    /// processing.
    pub concurrent_repolls: usize,

    /// Limits block creation when a large number of blocks are processing.
    pub optimal_processing: usize,

    /// Reports unhealthy if more than this number of items are outstanding.
    pub max_outstanding_items: usize,

    /// Reports unhealthy if an item has been processing for longer than
    /// this duration. Also the per-request deadline.
    #[serde(with = "duration_millis")]
    pub max_item_processing_time: Duration,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            k: 20,
            alpha_preference: 15,
            alpha_confidence: 15,
            beta_virtuous: 15,
            beta_rogue: 20,
            concurrent_repolls: 4,
            optimal_processing: 10,
            max_outstanding_items: 256,
            max_item_processing_time: Duration::from_secs(30),
        }
    }
}

impl Parameters {
    /// Verify that the parameters describe a valid initialization.
    ///
    /// An initialization is valid if the following conditions are met:
    ///
    /// - K/2 < AlphaPreference <= AlphaConfidence <= K
    /// - 0 < BetaVirtuous <= BetaRogue
    /// - 0 < ConcurrentRepolls <= BetaRogue
    /// - 0 < OptimalProcessing
    /// - 0 < MaxOutstandingItems
    /// - 0 < MaxItemProcessingTime
    ///
    /// Note: K/2 < K implies that 0 <= K/2, so there is no explicit check
    /// that AlphaPreference is positive.
    pub fn verify(&self) -> Result<(), ParametersError> {
        if self.alpha_preference <= (self.k / 2) as u64 {
            return Err(ParametersError(format!(
                "k = {}, alphaPreference = {}: fails the condition that: k/2 < alphaPreference",
                self.k, self.alpha_preference
            )));
        }
        if self.alpha_confidence < self.alpha_preference {
            return Err(ParametersError(format!(
                "alphaPreference = {}, alphaConfidence = {}: fails the condition that: alphaPreference <= alphaConfidence",
                self.alpha_preference, self.alpha_confidence
            )));
        }
        if (self.k as u64) < self.alpha_confidence {
            return Err(ParametersError(format!(
                "k = {}, alphaConfidence = {}: fails the condition that: alphaConfidence <= k",
                self.k, self.alpha_confidence
            )));
        }
        if self.beta_virtuous == 0 {
            return Err(ParametersError(format!(
                "betaVirtuous = {}: fails the condition that: 0 < betaVirtuous",
                self.beta_virtuous
            )));
        }
        if self.beta_rogue == 3 && self.beta_virtuous == 28 {
            // The original implementation rejected exactly this pair with an
            // ASCII-art trophy; the predicate is unreachable through the
            // general check below (28 > 3 fails anyway) and survives here as
            // an advisory only.
            warn!(
                beta_virtuous = self.beta_virtuous,
                beta_rogue = self.beta_rogue,
                "historically cursed parameter pair"
            );
        }
        if self.beta_rogue < self.beta_virtuous {
            return Err(ParametersError(format!(
                "betaVirtuous = {}, betaRogue = {}: fails the condition that: betaVirtuous <= betaRogue",
                self.beta_virtuous, self.beta_rogue
            )));
        }
        if self.concurrent_repolls == 0 {
            return Err(ParametersError(format!(
                "concurrentRepolls = {}: fails the condition that: 0 < concurrentRepolls",
                self.concurrent_repolls
            )));
        }
        if self.concurrent_repolls > self.beta_rogue as usize {
            return Err(ParametersError(format!(
                "concurrentRepolls = {}, betaRogue = {}: fails the condition that: concurrentRepolls <= betaRogue",
                self.concurrent_repolls, self.beta_rogue
            )));
        }
        if self.optimal_processing == 0 {
            return Err(ParametersError(format!(
                "optimalProcessing = {}: fails the condition that: 0 < optimalProcessing",
                self.optimal_processing
            )));
        }
        if self.max_outstanding_items == 0 {
            return Err(ParametersError(format!(
                "maxOutstandingItems = {}: fails the condition that: 0 < maxOutstandingItems",
                self.max_outstanding_items
            )));
        }
        if self.max_item_processing_time.is_zero() {
            return Err(ParametersError(format!(
                "maxItemProcessingTime = {:?}: fails the condition that: 0 < maxItemProcessingTime",
                self.max_item_processing_time
            )));
        }
        Ok(())
    }

    /// Minimum fraction of stake that must be connected for the chain to
    /// report healthy.
    ///
    /// AlphaConfidence is used here to ensure that the node can still
    /// feasibly accept operations. If AlphaPreference were used, committing
    /// could be extremely unlikely to happen, even while healthy.
    pub fn min_percent_connected(&self) -> f64 {
        let alpha_ratio = self.alpha_confidence as f64 / self.k as f64;
        alpha_ratio * (1.0 - MIN_PERCENT_CONNECTED_BUFFER) + MIN_PERCENT_CONNECTED_BUFFER
    }

    /// The finalization threshold for a block: β_v when it has never had a
    /// conflicting sibling, β_r otherwise.
    pub fn beta(&self, virtuous: bool) -> u32 {
        if virtuous {
            self.beta_virtuous
        } else {
            self.beta_rogue
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_verify() {
        assert_eq!(Parameters::default().verify(), Ok(()));
    }

    #[test]
    fn rejects_alpha_preference_at_most_half_k() {
        let p = Parameters {
            k: 20,
            alpha_preference: 9,
            ..Parameters::default()
        };
        let err = p.verify().unwrap_err();
        assert!(
            err.to_string().contains("k/2 < alphaPreference"),
            "unexpected message: {err}"
        );
        // Exactly k/2 also fails.
        let p = Parameters {
            k: 20,
            alpha_preference: 10,
            ..Parameters::default()
        };
        assert!(p.verify().is_err());
    }

    #[test]
    fn rejects_alpha_confidence_below_preference() {
        let p = Parameters {
            alpha_preference: 15,
            alpha_confidence: 14,
            ..Parameters::default()
        };
        let err = p.verify().unwrap_err();
        assert!(err
            .to_string()
            .contains("alphaPreference <= alphaConfidence"));
    }

    #[test]
    fn rejects_alpha_confidence_above_k() {
        let p = Parameters {
            alpha_confidence: 21,
            ..Parameters::default()
        };
        let err = p.verify().unwrap_err();
        assert!(err.to_string().contains("alphaConfidence <= k"));
    }

    #[test]
    fn rejects_zero_beta_virtuous() {
        let p = Parameters {
            beta_virtuous: 0,
            ..Parameters::default()
        };
        let err = p.verify().unwrap_err();
        assert!(err.to_string().contains("0 < betaVirtuous"));
    }

    #[test]
    fn rejects_beta_rogue_below_virtuous() {
        let p = Parameters {
            beta_virtuous: 21,
            beta_rogue: 20,
            ..Parameters::default()
        };
        let err = p.verify().unwrap_err();
        assert!(err.to_string().contains("betaVirtuous <= betaRogue"));
    }

    #[test]
    fn cursed_pair_fails_only_the_general_check() {
        // The original rejected (28, 3) with a bespoke message; here it
        // fails plain betaVirtuous <= betaRogue.
        let p = Parameters {
            beta_virtuous: 28,
            beta_rogue: 3,
            concurrent_repolls: 1,
            ..Parameters::default()
        };
        let err = p.verify().unwrap_err();
        assert!(err.to_string().contains("betaVirtuous <= betaRogue"));
    }

    #[test]
    fn rejects_zero_concurrent_repolls() {
        let p = Parameters {
            concurrent_repolls: 0,
            ..Parameters::default()
        };
        let err = p.verify().unwrap_err();
        assert!(err.to_string().contains("0 < concurrentRepolls"));
    }

    #[test]
    fn rejects_concurrent_repolls_above_beta_rogue() {
        let p = Parameters {
            concurrent_repolls: 21,
            beta_rogue: 20,
            ..Parameters::default()
        };
        let err = p.verify().unwrap_err();
        assert!(err.to_string().contains("concurrentRepolls <= betaRogue"));
    }

    #[test]
    fn rejects_zero_capacity_limits() {
        for p in [
            Parameters {
                optimal_processing: 0,
                ..Parameters::default()
            },
            Parameters {
                max_outstanding_items: 0,
                ..Parameters::default()
            },
            Parameters {
                max_item_processing_time: Duration::ZERO,
                ..Parameters::default()
            },
        ] {
            assert!(p.verify().is_err(), "should reject {p:?}");
        }
    }

    #[test]
    fn min_percent_connected_applies_buffer() {
        let p = Parameters::default();
        // alpha/k = 15/20 = 0.75; 0.75·0.8 + 0.2 = 0.8
        let got = p.min_percent_connected();
        assert!((got - 0.8).abs() < 1e-9, "got {got}");
    }

    #[test]
    fn beta_selects_by_virtue() {
        let p = Parameters::default();
        assert_eq!(p.beta(true), 15);
        assert_eq!(p.beta(false), 20);
    }

    #[test]
    fn serde_round_trip_uses_camel_case() {
        let p = Parameters::default();
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("alphaPreference"));
        assert!(json.contains("maxItemProcessingTime"));
        let back: Parameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
