//! Per-poll vote aggregation.

use snowfall_types::BlockId;
use std::collections::BTreeMap;

/// A tallied bag of block-id votes for one closed poll.
///
/// Each of the K sampled peers contributes either a vote for a block id or a
/// failure (no answer in time, invalid response, benched). Failures never
/// count toward any block; they only widen the gap to quorum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    votes: BTreeMap<BlockId, u64>,
    failure_weight: u64,
}

impl Tally {
    /// An empty tally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote for `block_id` with the given weight.
    ///
    /// Duplicate votes from re-tallied responses simply accumulate; the
    /// poll scheduler guarantees one response per sampled peer.
    pub fn add_vote(&mut self, block_id: BlockId, weight: u64) {
        *self.votes.entry(block_id).or_insert(0) += weight;
    }

    /// Record a peer that did not produce a usable vote.
    pub fn add_failure(&mut self, weight: u64) {
        self.failure_weight += weight;
    }

    /// Aggregate weight voting for `block_id`.
    pub fn weight(&self, block_id: &BlockId) -> u64 {
        self.votes.get(block_id).copied().unwrap_or(0)
    }

    /// Total weight of counted votes (failures excluded).
    pub fn vote_weight(&self) -> u64 {
        self.votes.values().sum()
    }

    /// Weight of failed responders.
    pub fn failure_weight(&self) -> u64 {
        self.failure_weight
    }

    /// True if no votes were recorded at all.
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// The block meeting `threshold`, if any.
    ///
    /// With threshold > K/2 at most one block can qualify. For the partial
    /// tallies that arise below that bound, the heaviest block wins and
    /// equal weights break toward the smallest id, so every replica that
    /// sees the same tally draws the same conclusion.
    pub fn quorum(&self, threshold: u64) -> Option<BlockId> {
        self.votes
            .iter()
            .filter(|(_, weight)| **weight >= threshold)
            // max_by_key keeps the *last* maximum; reverse the id order so
            // ties resolve to the smallest id.
            .max_by_key(|(id, weight)| (*weight, std::cmp::Reverse(*id)))
            .map(|(id, _)| *id)
    }

    /// Iterate (block, weight) pairs in block-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&BlockId, &u64)> {
        self.votes.iter()
    }
}
