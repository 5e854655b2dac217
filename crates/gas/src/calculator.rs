//! Per-chain gas state: cap, price, excess, and the in-progress block
//! accumulator.

use crate::{config, FeeConfig, FeeConfigError, Gas, GasPrice};
use tracing::debug;

/// Gas accounting failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GasError {
    #[error("invalid fee config: {0}")]
    Config(#[from] FeeConfigError),

    /// A block tried to consume more gas than the bucket holds.
    #[error("gas bound breached")]
    GasBoundBreached,

    /// Child block timestamp precedes the parent's.
    #[error("unexpected block times, parent {parent}, child {child}")]
    UnexpectedBlockTimes { parent: u64, child: u64 },

    #[error("gas arithmetic overflow")]
    Overflow,

    #[error("gas arithmetic underflow")]
    Underflow,
}

/// Gas state for one chain.
///
/// Owned and mutated exclusively by the chain's event loop. Every replica
/// feeds it the same accepted blocks in the same order, so cap, excess, and
/// price stay identical across the network.
#[derive(Debug, Clone)]
pub struct Calculator {
    cfg: FeeConfig,

    /// Gas cap enforced when cumulating gas into a block.
    gas_cap: Gas,

    /// Fee per unit of complexity.
    gas_price: GasPrice,

    /// Gas aggregated into the block currently being assembled.
    block_gas: Gas,

    /// Cumulative consumed-minus-target gas; drives the price.
    excess_gas: Gas,
}

impl Calculator {
    /// Create the gas state for a fresh chain: full bucket, floor price.
    pub fn new(cfg: FeeConfig) -> Result<Self, GasError> {
        cfg.validate()?;
        let gas_price = fake_exponential(cfg.min_gas_price, 0, cfg.update_denominator);
        Ok(Self {
            gas_cap: cfg.max_gas_per_second,
            gas_price,
            block_gas: 0,
            excess_gas: 0,
            cfg,
        })
    }

    /// Current gas price.
    pub fn gas_price(&self) -> GasPrice {
        self.gas_price
    }

    /// Current bucket capacity.
    pub fn gas_cap(&self) -> Gas {
        self.gas_cap
    }

    /// Gas accumulated into the in-progress block.
    pub fn block_gas(&self) -> Gas {
        self.block_gas
    }

    /// Current excess gas.
    pub fn excess_gas(&self) -> Gas {
        self.excess_gas
    }

    /// Fee for consuming `gas` at the current price. Stateless.
    pub fn calculate_fee(&self, gas: Gas) -> Result<u64, GasError> {
        self.gas_price.checked_mul(gas).ok_or(GasError::Overflow)
    }

    /// Target gas for the elapsed time between two block timestamps.
    fn target_gas(&self, parent_ts: u64, child_ts: u64) -> Result<Gas, GasError> {
        if child_ts < parent_ts {
            return Err(GasError::UnexpectedBlockTimes {
                parent: parent_ts,
                child: child_ts,
            });
        }
        Ok(self.cfg.gas_target_rate.saturating_mul(child_ts - parent_ts))
    }

    /// Account a sealed block: leak the cap for elapsed time, enforce the
    /// bound, fold consumed gas into the excess, and reprice.
    ///
    /// Per-block arithmetic, in order:
    /// 1. `cap' = min(MaxGasPerSecond, cap + MaxGasPerSecond · Δ / LeakGasCoeff)`
    /// 2. `target = GasTargetRate · Δ` (saturating)
    /// 3. `excess' = max(0, excess + consumed − target)`
    /// 4. `price = fake_exponential(MinGasPrice, excess', UpdateDenominator)`
    /// 5. `cap'' = cap' − consumed` (saturating)
    pub fn seal_block(
        &mut self,
        parent_ts: u64,
        child_ts: u64,
        consumed: Gas,
    ) -> Result<(), GasError> {
        let target = self.target_gas(parent_ts, child_ts)?;
        let cap = config::gas_cap(&self.cfg, self.gas_cap, child_ts - parent_ts);

        if consumed > cap {
            return Err(GasError::GasBoundBreached);
        }

        self.excess_gas = self
            .excess_gas
            .saturating_add(consumed)
            .saturating_sub(target);
        self.gas_price =
            fake_exponential(self.cfg.min_gas_price, self.excess_gas, self.cfg.update_denominator);
        self.gas_cap = config::update_gas_cap(cap, consumed);
        self.block_gas = 0;

        debug!(
            consumed,
            target,
            excess = self.excess_gas,
            price = self.gas_price,
            cap = self.gas_cap,
            "sealed block gas"
        );
        Ok(())
    }

    /// Open a new block for assembly: leak the cap for the proposed child
    /// time and clear the in-progress accumulator.
    pub fn begin_block(&mut self, parent_ts: u64, child_ts: u64) -> Result<(), GasError> {
        if child_ts < parent_ts {
            return Err(GasError::UnexpectedBlockTimes {
                parent: parent_ts,
                child: child_ts,
            });
        }
        self.gas_cap = config::gas_cap(&self.cfg, self.gas_cap, child_ts - parent_ts);
        self.block_gas = 0;
        Ok(())
    }

    /// Cumulate consumed gas into the in-progress block. Checks the bound
    /// before committing; on error nothing is updated.
    pub fn cumulate_gas(&mut self, gas: Gas) -> Result<(), GasError> {
        let block_gas = self
            .block_gas
            .checked_add(gas)
            .ok_or(GasError::GasBoundBreached)?;
        if block_gas > self.gas_cap {
            return Err(GasError::GasBoundBreached);
        }
        self.block_gas = block_gas;
        Ok(())
    }

    /// Remove speculatively added complexity during block building.
    pub fn remove_gas(&mut self, gas: Gas) -> Result<(), GasError> {
        self.block_gas = self.block_gas.checked_sub(gas).ok_or(GasError::Underflow)?;
        Ok(())
    }
}

/// Approximate `factor · e^(numerator / denominator)` with the Taylor
/// expansion `Σ factor·d·(n/d)^i / i!`, saturating at `u64::MAX`.
///
/// Intermediates use u128; any overflow means the true value is far above
/// the u64 range, so saturation is exact within the result domain.
fn fake_exponential(factor: GasPrice, numerator: Gas, denominator: Gas) -> GasPrice {
    debug_assert!(denominator > 0, "validated at construction");

    let d = denominator as u128;
    let n = numerator as u128;
    let mut output: u128 = 0;
    let mut accum: u128 = factor as u128 * d;

    let mut i: u128 = 1;
    while accum > 0 {
        output = match output.checked_add(accum) {
            Some(v) => v,
            None => return u64::MAX,
        };

        accum = match accum.checked_mul(n) {
            Some(v) => v / d / i,
            None => {
                // Divide first; only saturate if the product truly overflows.
                match (accum / d / i).checked_mul(n) {
                    Some(v) => v,
                    None => return u64::MAX,
                }
            }
        };
        i += 1;
    }

    u64::try_from(output / d).unwrap_or(u64::MAX)
}
