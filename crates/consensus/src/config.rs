//! Engine configuration.

use crate::Parameters;
use snowfall_types::ChainId;

/// Configuration for one chain's decision machine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Chain this engine decides for; stamped on every outbound message.
    pub chain_id: ChainId,

    /// Consensus parameters. Verified before the chain starts.
    pub params: Parameters,

    /// Capacity of the unknown-parent buffer. Overflow drops the oldest
    /// entry.
    pub max_pending_blocks: usize,
}

impl EngineConfig {
    /// Configuration with default tuning for the given chain.
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            params: Parameters::default(),
            max_pending_blocks: 64,
        }
    }
}
