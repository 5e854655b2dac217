//! Chain health evaluation.

use snowfall_consensus::Parameters;
use std::time::Duration;

/// Overall verdict of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Not enough stake connected to get queries answered.
    InsufficientStake,
    /// Too many items outstanding.
    TooManyOutstanding,
    /// Some item has been processing for too long.
    ProcessingTooLong,
    /// Still bootstrapping.
    Bootstrapping,
}

/// A structured health report for one chain.
///
/// A chain is healthy iff enough stake is connected to answer queries, the
/// outstanding item count is bounded, and no item has been processing
/// longer than the configured maximum.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Fraction of total stake currently connected.
    pub connected_ratio: f64,
    /// Required minimum connected-stake fraction.
    pub min_connected_ratio: f64,
    /// Blocks currently processing.
    pub outstanding: usize,
    pub max_outstanding: usize,
    /// Age of the oldest processing block, if any.
    pub oldest_processing: Option<Duration>,
    pub max_processing: Duration,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Evaluate chain health from a stake snapshot and engine counters.
pub fn evaluate(
    params: &Parameters,
    connected_stake: u64,
    total_stake: u64,
    outstanding: usize,
    oldest_processing: Option<Duration>,
    bootstrapped: bool,
) -> HealthReport {
    let connected_ratio = if total_stake == 0 {
        0.0
    } else {
        connected_stake as f64 / total_stake as f64
    };
    let min_connected_ratio = params.min_percent_connected();

    let status = if !bootstrapped {
        HealthStatus::Bootstrapping
    } else if connected_ratio < min_connected_ratio {
        HealthStatus::InsufficientStake
    } else if outstanding > params.max_outstanding_items {
        HealthStatus::TooManyOutstanding
    } else if oldest_processing.is_some_and(|age| age > params.max_item_processing_time) {
        HealthStatus::ProcessingTooLong
    } else {
        HealthStatus::Healthy
    };

    HealthReport {
        status,
        connected_ratio,
        min_connected_ratio,
        outstanding,
        max_outstanding: params.max_outstanding_items,
        oldest_processing,
        max_processing: params.max_item_processing_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_connected_idle_chain_is_healthy() {
        let report = evaluate(&Parameters::default(), 100, 100, 0, None, true);
        assert!(report.is_healthy());
    }

    #[test]
    fn insufficient_stake_is_flagged() {
        // Defaults need 80% connected.
        let report = evaluate(&Parameters::default(), 79, 100, 0, None, true);
        assert_eq!(report.status, HealthStatus::InsufficientStake);
        let report = evaluate(&Parameters::default(), 80, 100, 0, None, true);
        assert!(report.is_healthy());
    }

    #[test]
    fn outstanding_overflow_is_flagged() {
        let params = Parameters::default();
        let report = evaluate(&params, 100, 100, params.max_outstanding_items + 1, None, true);
        assert_eq!(report.status, HealthStatus::TooManyOutstanding);
    }

    #[test]
    fn stale_processing_item_is_flagged() {
        let params = Parameters::default();
        let stale = params.max_item_processing_time + Duration::from_secs(1);
        let report = evaluate(&params, 100, 100, 1, Some(stale), true);
        assert_eq!(report.status, HealthStatus::ProcessingTooLong);
    }

    #[test]
    fn bootstrapping_dominates() {
        let report = evaluate(&Parameters::default(), 100, 100, 0, None, false);
        assert_eq!(report.status, HealthStatus::Bootstrapping);
    }

    #[test]
    fn zero_stake_counts_as_disconnected() {
        let report = evaluate(&Parameters::default(), 0, 0, 0, None, true);
        assert_eq!(report.status, HealthStatus::InsufficientStake);
    }
}
