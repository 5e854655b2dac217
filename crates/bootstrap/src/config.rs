//! Bootstrapper configuration.

use snowfall_consensus::Parameters;
use snowfall_types::ChainId;
use std::time::Duration;

/// Configuration for one chain's bootstrapper.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Chain being bootstrapped.
    pub chain_id: ChainId,

    /// Beacons sampled per tip-selection round.
    pub sample_beacons: usize,

    /// Aggregate weight of agreeing beacons needed to pick a target tip,
    /// and to declare bootstrap finished.
    pub alpha: u64,

    /// This node only considers the first `ancestors_max_containers`
    /// containers in an ancestors message it receives.
    pub ancestors_max_containers: usize,

    /// Deadline for each outstanding request.
    pub request_timeout: Duration,

    /// A peer failing this many times is skipped for the remainder of the
    /// round.
    pub max_peer_failures: u32,

    /// Restart target selection when no block advanced for this long.
    pub watchdog_interval: Duration,
}

impl BootstrapConfig {
    /// Derive the bootstrap tuning from the chain's consensus parameters:
    /// sample K beacons, agree at the confidence threshold, time requests
    /// out like any other item.
    pub fn from_params(chain_id: ChainId, params: &Parameters) -> Self {
        Self {
            chain_id,
            sample_beacons: params.k,
            alpha: params.alpha_confidence,
            ancestors_max_containers: 2000,
            request_timeout: params.max_item_processing_time,
            max_peer_failures: 3,
            watchdog_interval: params.max_item_processing_time * 2,
        }
    }
}
