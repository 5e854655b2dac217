//! Dynamic fee configuration and the leaky-bucket gas cap.

use crate::{Dimensions, Gas, GasPrice};
use serde::{Deserialize, Serialize};

/// Configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FeeConfigError {
    #[error("zero leak gas coefficient")]
    ZeroLeakGasCoeff,
    #[error("zero update denominator")]
    ZeroUpdateDenominator,
}

/// Dynamic fee configuration, fixed at chain start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Floor gas price; the price when excess gas is zero.
    pub min_gas_price: GasPrice,

    /// Weights merging complexity dimensions into a single gas value.
    pub weights: Dimensions,

    /// Leaky bucket refill rate. Technically Gas/sec, but keeping the Gas
    /// type reduces casts.
    pub max_gas_per_second: Gas,

    /// Seconds to refill an empty bucket completely. Technically sec^-1 in
    /// the refill formula; keeping the Gas type reduces casts.
    pub leak_gas_coeff: Gas,

    /// Denominator of the exponential price update.
    pub update_denominator: Gas,

    /// Target gas consumption rate, Gas/sec. Consumption above this rate
    /// accumulates excess and drives the price up.
    pub gas_target_rate: Gas,
}

impl FeeConfig {
    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), FeeConfigError> {
        if self.leak_gas_coeff == 0 {
            return Err(FeeConfigError::ZeroLeakGasCoeff);
        }
        if self.update_denominator == 0 {
            return Err(FeeConfigError::ZeroUpdateDenominator);
        }
        Ok(())
    }
}

/// Refill the gas cap for elapsed block time with a leaky bucket:
/// `cap' = min(MaxGasPerSecond, cap + MaxGasPerSecond · Δ / LeakGasCoeff)`.
///
/// `elapsed_secs` is the child-minus-parent block time; callers reject
/// blocks whose timestamp precedes their parent's before getting here.
pub fn gas_cap(cfg: &FeeConfig, current_cap: Gas, elapsed_secs: u64) -> Gas {
    if elapsed_secs >= cfg.leak_gas_coeff {
        return cfg.max_gas_per_second;
    }

    let refill = (cfg.max_gas_per_second as u128 * elapsed_secs as u128
        / cfg.leak_gas_coeff as u128) as u64;
    cfg.max_gas_per_second
        .min(current_cap.saturating_add(refill))
}

/// Drain the cap by the gas a sealed block consumed.
pub fn update_gas_cap(current_cap: Gas, block_gas: Gas) -> Gas {
    current_cap.saturating_sub(block_gas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FeeConfig {
        FeeConfig {
            min_gas_price: 1,
            weights: Dimensions([1, 1, 1, 1]),
            max_gas_per_second: 1000,
            leak_gas_coeff: 10,
            update_denominator: 1,
            gas_target_rate: 50,
        }
    }

    #[test]
    fn validate_rejects_zero_leak_coeff() {
        let mut c = cfg();
        c.leak_gas_coeff = 0;
        assert_eq!(c.validate(), Err(FeeConfigError::ZeroLeakGasCoeff));
    }

    #[test]
    fn validate_rejects_zero_update_denominator() {
        let mut c = cfg();
        c.update_denominator = 0;
        assert_eq!(c.validate(), Err(FeeConfigError::ZeroUpdateDenominator));
    }

    #[test]
    fn cap_refills_proportionally() {
        // MaxGasPerSecond=1000, LeakGasCoeff=10, cap=500, Δ=5s:
        // cap' = min(1000, 500 + 1000·5/10) = 1000
        assert_eq!(gas_cap(&cfg(), 500, 5), 1000);
    }

    #[test]
    fn cap_partial_refill() {
        // Δ=2s: cap' = min(1000, 100 + 1000·2/10) = 300
        assert_eq!(gas_cap(&cfg(), 100, 2), 300);
    }

    #[test]
    fn cap_saturates_at_max_rate() {
        assert_eq!(gas_cap(&cfg(), 0, 10), 1000);
        assert_eq!(gas_cap(&cfg(), 0, 1000), 1000);
        assert_eq!(gas_cap(&cfg(), 999, 9), 1000);
    }

    #[test]
    fn cap_zero_elapsed_keeps_current() {
        assert_eq!(gas_cap(&cfg(), 123, 0), 123);
    }

    #[test]
    fn cap_drains_by_consumed_gas() {
        assert_eq!(update_gas_cap(1000, 300), 700);
        assert_eq!(update_gas_cap(200, 300), 0);
    }
}
