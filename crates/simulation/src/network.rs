//! Simulated network with deterministic latency, packet loss, and
//! partitions.

use crate::NodeIndex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::time::Duration;

/// Configuration for the simulated network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Number of nodes in the network.
    pub num_nodes: u32,
    /// Base message latency.
    pub latency: Duration,
    /// Jitter as a fraction of base latency (0.0 - 1.0).
    pub jitter_fraction: f64,
    /// Packet loss rate (0.0 - 1.0). Messages are dropped with this
    /// probability.
    pub packet_loss_rate: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            num_nodes: 5,
            latency: Duration::from_millis(50),
            jitter_fraction: 0.1,
            packet_loss_rate: 0.0,
        }
    }
}

/// Deterministic message delivery decisions.
///
/// Supports configurable latency with jitter, probabilistic (but seeded)
/// packet loss, and directional partitions.
#[derive(Debug)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
    /// Partitioned node pairs. If (a, b) is in this set, messages from a to
    /// b are dropped. Partitions are directional; both directions are added
    /// for a bidirectional cut.
    partitions: HashSet<(NodeIndex, NodeIndex)>,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            partitions: HashSet::new(),
        }
    }

    /// Number of nodes in the network.
    pub fn num_nodes(&self) -> u32 {
        self.config.num_nodes
    }

    // ─── Partition management ───

    pub fn is_partitioned(&self, from: NodeIndex, to: NodeIndex) -> bool {
        self.partitions.contains(&(from, to))
    }

    /// Cut both directions between two nodes.
    pub fn partition_bidirectional(&mut self, a: NodeIndex, b: NodeIndex) {
        self.partitions.insert((a, b));
        self.partitions.insert((b, a));
    }

    /// Isolate a node from every other node.
    pub fn isolate_node(&mut self, node: NodeIndex) {
        for other in 0..self.config.num_nodes {
            if other != node {
                self.partitions.insert((node, other));
                self.partitions.insert((other, node));
            }
        }
    }

    /// Restore connectivity for a node.
    pub fn heal_node(&mut self, node: NodeIndex) {
        self.partitions
            .retain(|(a, b)| *a != node && *b != node);
    }

    /// Restore full connectivity.
    pub fn heal_all(&mut self) {
        self.partitions.clear();
    }

    /// Set the packet loss rate (0.0 - 1.0).
    pub fn set_packet_loss_rate(&mut self, rate: f64) {
        self.config.packet_loss_rate = rate.clamp(0.0, 1.0);
    }

    // ─── Delivery decision ───

    /// Decide whether and when a message from `from` reaches `to`.
    ///
    /// `None` means dropped (partition or loss); `Some(latency)` means
    /// delivered after that delay. Deterministic given the rng state.
    pub fn should_deliver(
        &self,
        from: NodeIndex,
        to: NodeIndex,
        rng: &mut ChaCha8Rng,
    ) -> Option<Duration> {
        if self.is_partitioned(from, to) {
            return None;
        }
        if self.config.packet_loss_rate > 0.0 && rng.gen::<f64>() < self.config.packet_loss_rate {
            return None;
        }

        let base = self.config.latency.as_secs_f64();
        let jitter = base * self.config.jitter_fraction * rng.gen::<f64>();
        Some(Duration::from_secs_f64(base + jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn partitions_drop_messages() {
        let mut net = SimulatedNetwork::new(NetworkConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        assert!(net.should_deliver(0, 1, &mut rng).is_some());
        net.partition_bidirectional(0, 1);
        assert!(net.should_deliver(0, 1, &mut rng).is_none());
        assert!(net.should_deliver(1, 0, &mut rng).is_none());
        assert!(net.should_deliver(0, 2, &mut rng).is_some());

        net.heal_all();
        assert!(net.should_deliver(0, 1, &mut rng).is_some());
    }

    #[test]
    fn isolation_cuts_all_links() {
        let mut net = SimulatedNetwork::new(NetworkConfig::default());
        net.isolate_node(2);
        for other in [0u32, 1, 3, 4] {
            assert!(net.is_partitioned(2, other));
            assert!(net.is_partitioned(other, 2));
        }
        net.heal_node(2);
        assert!(!net.is_partitioned(2, 0));
    }

    #[test]
    fn latency_includes_bounded_jitter() {
        let net = SimulatedNetwork::new(NetworkConfig {
            latency: Duration::from_millis(100),
            jitter_fraction: 0.5,
            ..NetworkConfig::default()
        });
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            let d = net.should_deliver(0, 1, &mut rng).unwrap();
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn full_loss_drops_everything() {
        let mut net = SimulatedNetwork::new(NetworkConfig::default());
        net.set_packet_loss_rate(1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(net.should_deliver(0, 1, &mut rng).is_none());
    }
}
