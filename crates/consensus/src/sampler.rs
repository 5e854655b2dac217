//! Stake-weighted peer sampling.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use snowfall_types::{NodeId, ValidatorSet};

/// Draw up to `k` distinct peers from `validators`, weighted by stake,
/// without replacement.
///
/// Selection probability is proportional to remaining stake at each draw,
/// which is uniform in the weighted sense. If fewer than `k` validators
/// exist, every validator is returned and the caller works with a reduced
/// effective K for the round.
///
/// Returns `None` when the set is empty: the chain is unhealthy and no poll
/// may be opened.
///
/// Determinism: given the same rng state and the same snapshot, the sample
/// is identical. Replicas seed their rng independently, so two replicas
/// never agree on samples.
pub fn sample(
    validators: &ValidatorSet,
    k: usize,
    rng: &mut ChaCha8Rng,
) -> Option<Vec<NodeId>> {
    if validators.is_empty() {
        return None;
    }

    if validators.len() <= k {
        // Reduced effective K: everyone gets queried.
        return Some(validators.iter().map(|v| v.node_id).collect());
    }

    let mut pool: Vec<(NodeId, u64)> = validators.iter().map(|v| (v.node_id, v.weight)).collect();
    let mut remaining: u64 = validators.total_weight();
    let mut sampled = Vec::with_capacity(k);

    for _ in 0..k {
        let mut point = rng.gen_range(0..remaining);
        let idx = pool
            .iter()
            .position(|(_, weight)| {
                if point < *weight {
                    true
                } else {
                    point -= weight;
                    false
                }
            })
            .expect("point is below the remaining weight");

        let (node_id, weight) = pool.swap_remove(idx);
        remaining -= weight;
        sampled.push(node_id);
    }

    Some(sampled)
}
