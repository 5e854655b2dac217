//! Dynamic gas fee engine.
//!
//! Block admission is policed by two coupled quantities that every replica
//! recomputes deterministically per block:
//!
//! - **Gas cap**: a leaky-bucket capacity that refills with elapsed block
//!   time and drains with consumed gas. A block may not consume more than
//!   the cap available at its seal time.
//! - **Gas price**: an exponential function of *excess gas*, the running
//!   integral of consumed-minus-target gas. Consumption above the target
//!   rate raises the price; idle time lets it decay back to the floor.
//!
//! The arithmetic is checked everywhere: all overflows either saturate (the
//! price) or fail the operation atomically (gas accumulation), so replicas
//! can never diverge through wrap-around.

mod calculator;
mod config;
mod dimensions;

pub use calculator::{Calculator, GasError};
pub use config::{gas_cap, update_gas_cap, FeeConfig, FeeConfigError};
pub use dimensions::{Dimension, Dimensions, DimensionsError, NUM_DIMENSIONS};

pub use snowfall_types::Gas;

/// Gas price: fee per unit of complexity.
pub type GasPrice = u64;
