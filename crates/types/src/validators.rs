//! Weighted validator sets.

use crate::NodeId;
use std::collections::BTreeMap;

/// A validator: a peer with positive stake weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    /// Peer identity.
    pub node_id: NodeId,
    /// Stake weight. Always > 0; zero-weight entries are dropped on insert.
    pub weight: u64,
}

/// An immutable snapshot of the validator set.
///
/// The decision machine takes one snapshot per poll round; epoch refreshes
/// delivered by the VM replace the whole set between polls. Iteration is in
/// `NodeId` order so every weighted walk over the set is reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatorSet {
    validators: BTreeMap<NodeId, u64>,
    total_weight: u64,
}

impl ValidatorSet {
    /// Build a set from validators. Zero-weight entries are ignored;
    /// duplicate node ids keep the last weight seen.
    pub fn new(validators: impl IntoIterator<Item = Validator>) -> Self {
        let mut map = BTreeMap::new();
        for v in validators {
            if v.weight == 0 {
                continue;
            }
            map.insert(v.node_id, v.weight);
        }
        let total_weight = map.values().sum();
        Self {
            validators: map,
            total_weight,
        }
    }

    /// Number of validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// True if the set has no validators.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Sum of all weights.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Weight of a single validator, if present.
    pub fn weight_of(&self, node_id: &NodeId) -> Option<u64> {
        self.validators.get(node_id).copied()
    }

    /// True if the node is in the set.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.validators.contains_key(node_id)
    }

    /// Iterate validators in `NodeId` order.
    pub fn iter(&self) -> impl Iterator<Item = Validator> + '_ {
        self.validators.iter().map(|(node_id, weight)| Validator {
            node_id: *node_id,
            weight: *weight,
        })
    }

    /// Aggregate weight of the given nodes. Nodes outside the set count 0;
    /// duplicate ids are counted once.
    pub fn weight_of_subset<'a>(&self, nodes: impl IntoIterator<Item = &'a NodeId>) -> u64 {
        let unique: std::collections::BTreeSet<&NodeId> = nodes.into_iter().collect();
        unique
            .into_iter()
            .filter_map(|n| self.weight_of(n))
            .sum()
    }
}
