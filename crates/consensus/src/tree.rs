//! The preference tree: blocks in flight, anchored at the last accepted
//! block.
//!
//! Every node carries the snowball state for the block it holds:
//!
//! - `preferred_child`: the branch this node currently prefers
//! - `preference_id`: the deepest preferred descendant (cached)
//! - `confidence`: consecutive successful quorums supporting the preference
//! - `virtuous`: true while the block has never had a conflicting sibling
//!
//! The tree is single-writer: only the decision machine mutates it.
//! Acceptance re-roots the tree at the winning block and drops every losing
//! subtree; rejection order visits children in increasing `BlockId` order so
//! replica logs line up.

use crate::{Parameters, Tally};
use snowfall_types::{Block, BlockId};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace, warn};

/// Failure adding a block to the tree. Peer-origin; never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// The parent is neither the root nor a processing block. The engine
    /// buffers such blocks briefly, then drops them.
    #[error("missing parent {0}")]
    MissingParent(BlockId),

    /// The block is already the root or in the tree.
    #[error("block {0} already known")]
    AlreadyKnown(BlockId),

    /// Height does not extend the parent by one.
    #[error("invalid height {got}, expected {expected}")]
    InvalidHeight { expected: u64, got: u64 },
}

/// Result of an [`PreferenceTree::accept`] sweep.
#[derive(Debug, Default)]
pub struct AcceptOutcome {
    /// Newly accepted blocks, in height order.
    pub accepted: Vec<Block>,
    /// Rejected blocks from discarded subtrees, in deterministic order.
    pub rejected: Vec<Block>,
}

impl AcceptOutcome {
    /// True if the sweep decided nothing.
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }
}

#[derive(Debug)]
struct TNode {
    block: Block,
    children: BTreeSet<BlockId>,
    preferred_child: Option<BlockId>,
    /// Deepest preferred descendant; the block itself when it is a leaf on
    /// its preferred path.
    preference_id: BlockId,
    /// Consecutive successful quorums supporting `preference_id`.
    confidence: u32,
    /// True iff this block has never had a conflicting sibling.
    virtuous: bool,
}

/// The DAG-of-blocks-in-flight, anchored at the last accepted block.
#[derive(Debug)]
pub struct PreferenceTree {
    nodes: HashMap<BlockId, TNode>,
    root_id: BlockId,
}

impl PreferenceTree {
    /// Create a tree rooted at the last accepted block.
    pub fn new(root: Block) -> Self {
        let root_id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(
            root_id,
            TNode {
                preference_id: root_id,
                block: root,
                children: BTreeSet::new(),
                preferred_child: None,
                confidence: 0,
                virtuous: true,
            },
        );
        Self { nodes, root_id }
    }

    /// Number of blocks in flight (the accepted root excluded).
    pub fn processing(&self) -> usize {
        self.nodes.len() - 1
    }

    /// The last accepted block.
    pub fn last_accepted(&self) -> &Block {
        &self.node(&self.root_id).block
    }

    /// The deepest preferred block id; the last accepted id when nothing is
    /// processing.
    pub fn preference(&self) -> BlockId {
        self.node(&self.root_id).preference_id
    }

    /// True if the block is the root or in flight.
    pub fn contains(&self, id: &BlockId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Fetch a block by id.
    pub fn get_block(&self, id: &BlockId) -> Option<&Block> {
        self.nodes.get(id).map(|n| &n.block)
    }

    /// The preferred block at a given height, walking the preferred path.
    pub fn preference_at_height(&self, height: u64) -> Option<BlockId> {
        let mut cur = self.root_id;
        loop {
            let node = self.node(&cur);
            if node.block.height.0 == height {
                return Some(cur);
            }
            if node.block.height.0 > height {
                return None;
            }
            cur = node.preferred_child?;
        }
    }

    /// Ids of the in-flight blocks, in id order (diagnostics and health).
    pub fn processing_ids(&self) -> Vec<BlockId> {
        let mut ids: Vec<BlockId> = self
            .nodes
            .keys()
            .filter(|id| **id != self.root_id)
            .copied()
            .collect();
        ids.sort();
        ids
    }

    fn node(&self, id: &BlockId) -> &TNode {
        self.nodes
            .get(id)
            .unwrap_or_else(|| panic!("tree invariant broken: missing node {id}"))
    }

    /// Add a verified block whose parent is the root or in flight.
    pub fn add(&mut self, block: Block) -> Result<(), TreeError> {
        let id = block.id;
        if self.nodes.contains_key(&id) {
            return Err(TreeError::AlreadyKnown(id));
        }
        let parent_id = block.parent_id;
        let Some(parent) = self.nodes.get_mut(&parent_id) else {
            return Err(TreeError::MissingParent(parent_id));
        };

        let expected = parent.block.height.0 + 1;
        if block.height.0 != expected {
            return Err(TreeError::InvalidHeight {
                expected,
                got: block.height.0,
            });
        }

        parent.children.insert(id);
        let had_siblings = parent.children.len() >= 2;
        let parent_was_leaf = parent.preferred_child.is_none();
        if parent_was_leaf {
            parent.preferred_child = Some(id);
        }

        if had_siblings {
            // The whole sibling group is rogue from now on; the flag never
            // flips back.
            let siblings: Vec<BlockId> = parent.children.iter().copied().collect();
            for sibling in siblings {
                if let Some(node) = self.nodes.get_mut(&sibling) {
                    node.virtuous = false;
                }
            }
        }

        self.nodes.insert(
            id,
            TNode {
                block,
                children: BTreeSet::new(),
                preferred_child: None,
                preference_id: id,
                confidence: 0,
                virtuous: !had_siblings,
            },
        );

        // With no competing path the new leaf becomes the preference of
        // every ancestor whose preference pointed at the parent.
        if parent_was_leaf {
            let mut cur = parent_id;
            loop {
                let node = self
                    .nodes
                    .get_mut(&cur)
                    .expect("ancestor chain stays within the tree");
                if cur != parent_id && node.preference_id != parent_id {
                    break;
                }
                node.preference_id = id;
                if cur == self.root_id {
                    break;
                }
                cur = node.block.parent_id;
            }
        }

        trace!(block = ?id, parent = ?parent_id, processing = self.processing(), "added block");
        Ok(())
    }

    /// Path of ids from the root (inclusive) down to `id` (inclusive).
    fn path_from_root(&self, id: BlockId) -> Vec<BlockId> {
        let mut path = vec![id];
        let mut cur = id;
        while cur != self.root_id {
            cur = self.node(&cur).block.parent_id;
            path.push(cur);
        }
        path.reverse();
        path
    }

    /// True if following preferred children from the root reaches `id`.
    fn is_on_preferred_path(&self, path: &[BlockId]) -> bool {
        path.windows(2)
            .all(|pair| self.node(&pair[0]).preferred_child == Some(pair[1]))
    }

    /// Apply a closed poll's tally.
    ///
    /// Two independent steps:
    /// 1. **Preference**: a block with ≥ alpha_preference weight pulls the
    ///    preferred path toward its branch; every node whose preference
    ///    changes has its confidence reset.
    /// 2. **Confidence**: a block with ≥ alpha_confidence weight whose path
    ///    agrees with the (possibly just-updated) preference increments
    ///    confidence along that path; every node off the path, or every
    ///    node at all when there is no confidence quorum, resets to zero.
    pub fn record_poll(&mut self, tally: &Tally, params: &Parameters) {
        // Step 1: preference update.
        if let Some(preferred) = tally.quorum(params.alpha_preference) {
            if self.nodes.contains_key(&preferred) {
                self.flip_preference_toward(preferred);
            } else {
                // A quorum for a block we never added; the poll still
                // counts as inconclusive for us.
                debug!(block = ?preferred, "preference quorum for unknown block");
            }
        }

        // Step 2: confidence update.
        let confident = tally
            .quorum(params.alpha_confidence)
            .filter(|id| self.nodes.contains_key(id));
        let success_path = confident.and_then(|id| {
            let path = self.path_from_root(id);
            self.is_on_preferred_path(&path).then_some(path)
        });

        match success_path {
            Some(path) => {
                let on_path: BTreeSet<BlockId> = path[1..].iter().copied().collect();
                for (id, node) in self.nodes.iter_mut() {
                    if on_path.contains(id) {
                        node.confidence += 1;
                    } else {
                        node.confidence = 0;
                    }
                }
                trace!(tip = ?path.last(), depth = on_path.len(), "confidence quorum");
            }
            None => {
                // Failed poll: consecutive-success counters restart.
                for node in self.nodes.values_mut() {
                    node.confidence = 0;
                }
                trace!("no confidence quorum, counters reset");
            }
        }
    }

    fn flip_preference_toward(&mut self, preferred: BlockId) {
        let path = self.path_from_root(preferred);
        let deepest = self.node(&preferred).preference_id;

        for pair in path.windows(2) {
            let (parent, child) = (pair[0], pair[1]);
            let node = self
                .nodes
                .get_mut(&parent)
                .expect("path nodes exist");
            if node.preferred_child != Some(child) {
                debug!(at = ?parent, from = ?node.preferred_child, to = ?child, "preference flipped");
                node.preferred_child = Some(child);
                node.confidence = 0;
            }
            node.preference_id = deepest;
        }
    }

    /// Sweep the preferred path for finalized blocks.
    ///
    /// A block finalizes when its confidence reaches beta (β_v while
    /// virtuous, β_r otherwise) and its parent is already accepted. Each
    /// acceptance re-roots the tree and rejects the losing subtrees,
    /// children visited in increasing block-id order.
    pub fn accept(&mut self, params: &Parameters) -> AcceptOutcome {
        let mut outcome = AcceptOutcome::default();

        loop {
            let root = self.node(&self.root_id);
            let Some(child_id) = root.preferred_child else {
                break;
            };
            let child = self.node(&child_id);
            if child.confidence < params.beta(child.virtuous) {
                break;
            }

            debug!(
                block = ?child_id,
                height = child.block.height.0,
                confidence = child.confidence,
                virtuous = child.virtuous,
                "accepting block"
            );

            // Reject every losing subtree, smallest sibling id first.
            let losers: Vec<BlockId> = root
                .children
                .iter()
                .copied()
                .filter(|c| *c != child_id)
                .collect();
            for loser in losers {
                self.reject_subtree(loser, &mut outcome.rejected);
            }

            // Re-root at the accepted child.
            let old_root = self
                .nodes
                .remove(&self.root_id)
                .expect("root exists");
            debug_assert_eq!(old_root.preferred_child, Some(child_id));
            self.root_id = child_id;
            outcome
                .accepted
                .push(self.node(&child_id).block.clone());
        }

        outcome
    }

    fn reject_subtree(&mut self, id: BlockId, rejected: &mut Vec<Block>) {
        let node = self
            .nodes
            .remove(&id)
            .unwrap_or_else(|| panic!("tree invariant broken: rejecting missing node {id}"));
        if node.block.id == self.node(&self.root_id).block.id {
            panic!("tree invariant broken: rejecting the accepted root");
        }
        warn!(block = ?id, height = node.block.height.0, "rejecting block");
        rejected.push(node.block);
        for child in node.children {
            self.reject_subtree(child, rejected);
        }
    }

    /// Confidence of a block, for tests and diagnostics.
    pub fn confidence(&self, id: &BlockId) -> Option<u32> {
        self.nodes.get(id).map(|n| n.confidence)
    }

    /// Virtue of a block, for tests and diagnostics.
    pub fn is_virtuous(&self, id: &BlockId) -> Option<bool> {
        self.nodes.get(id).map(|n| n.virtuous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snowfall_types::test_utils::{test_block, test_block_id};

    fn params(alpha_p: u64, alpha_c: u64, beta_v: u32, beta_r: u32) -> Parameters {
        Parameters {
            k: 5,
            alpha_preference: alpha_p,
            alpha_confidence: alpha_c,
            beta_virtuous: beta_v,
            beta_rogue: beta_r,
            concurrent_repolls: 1,
            ..Parameters::default()
        }
    }

    fn tally_of(votes: &[(u8, u64)]) -> Tally {
        let mut t = Tally::new();
        for (id, weight) in votes {
            t.add_vote(test_block_id(*id), *weight);
        }
        t
    }

    fn genesis_tree() -> PreferenceTree {
        PreferenceTree::new(test_block(0, 255, 0))
    }

    #[test]
    fn add_requires_known_parent() {
        let mut tree = genesis_tree();
        assert_eq!(
            tree.add(test_block(2, 1, 2)),
            Err(TreeError::MissingParent(test_block_id(1)))
        );
        assert_eq!(tree.add(test_block(1, 0, 1)), Ok(()));
        assert_eq!(tree.add(test_block(2, 1, 2)), Ok(()));
        assert_eq!(tree.processing(), 2);
    }

    #[test]
    fn add_rejects_duplicates_and_bad_heights() {
        let mut tree = genesis_tree();
        tree.add(test_block(1, 0, 1)).unwrap();
        assert_eq!(
            tree.add(test_block(1, 0, 1)),
            Err(TreeError::AlreadyKnown(test_block_id(1)))
        );
        assert_eq!(
            tree.add(test_block(2, 0, 5)),
            Err(TreeError::InvalidHeight {
                expected: 1,
                got: 5
            })
        );
    }

    #[test]
    fn first_child_becomes_preference() {
        let mut tree = genesis_tree();
        tree.add(test_block(1, 0, 1)).unwrap();
        assert_eq!(tree.preference(), test_block_id(1));

        // Deeper leaf extends the preferred path.
        tree.add(test_block(2, 1, 2)).unwrap();
        assert_eq!(tree.preference(), test_block_id(2));

        // A later sibling does not displace the existing preference.
        tree.add(test_block(3, 0, 1)).unwrap();
        assert_eq!(tree.preference(), test_block_id(2));
    }

    #[test]
    fn siblings_turn_each_other_rogue() {
        let mut tree = genesis_tree();
        tree.add(test_block(1, 0, 1)).unwrap();
        assert_eq!(tree.is_virtuous(&test_block_id(1)), Some(true));

        tree.add(test_block(2, 0, 1)).unwrap();
        assert_eq!(tree.is_virtuous(&test_block_id(1)), Some(false));
        assert_eq!(tree.is_virtuous(&test_block_id(2)), Some(false));

        // A child under a rogue parent is still virtuous while alone.
        tree.add(test_block(3, 1, 2)).unwrap();
        assert_eq!(tree.is_virtuous(&test_block_id(3)), Some(true));
    }

    #[test]
    fn virtuous_block_finalizes_at_beta_virtuous() {
        // Scenario: K=5, αₚ=α_c=4, β_v=2, β_r=3. Two unanimous polls accept.
        let p = params(4, 4, 2, 3);
        let mut tree = genesis_tree();
        tree.add(test_block(1, 0, 1)).unwrap();

        tree.record_poll(&tally_of(&[(1, 5)]), &p);
        assert_eq!(tree.confidence(&test_block_id(1)), Some(1));
        assert!(tree.accept(&p).is_empty());

        tree.record_poll(&tally_of(&[(1, 5)]), &p);
        let outcome = tree.accept(&p);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].id, test_block_id(1));
        assert!(outcome.rejected.is_empty());
        assert_eq!(tree.processing(), 0);
        assert_eq!(tree.last_accepted().id, test_block_id(1));
    }

    #[test]
    fn preference_flips_and_confidence_resets() {
        // Scenario: siblings B1, B2 under genesis; {B1:1, B2:4} with αₚ=3
        // flips preference to B2 and resets; {B2:5} then grows confidence.
        let p = params(3, 4, 2, 3);
        let mut tree = genesis_tree();
        tree.add(test_block(1, 0, 1)).unwrap();
        tree.add(test_block(2, 0, 1)).unwrap();
        assert_eq!(tree.preference(), test_block_id(1));

        tree.record_poll(&tally_of(&[(1, 1), (2, 4)]), &p);
        assert_eq!(tree.preference(), test_block_id(2));
        // B2 reached α_c in the same poll, so its first success counts.
        assert_eq!(tree.confidence(&test_block_id(2)), Some(1));
        assert_eq!(tree.confidence(&test_block_id(1)), Some(0));

        tree.record_poll(&tally_of(&[(2, 5)]), &p);
        assert_eq!(tree.confidence(&test_block_id(2)), Some(2));

        // β_r=3: both are rogue, no accept yet.
        assert!(tree.accept(&p).is_empty());

        tree.record_poll(&tally_of(&[(2, 5)]), &p);
        let outcome = tree.accept(&p);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].id, test_block_id(2));
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].id, test_block_id(1));
    }

    #[test]
    fn failed_poll_resets_confidence() {
        let p = params(4, 4, 3, 3);
        let mut tree = genesis_tree();
        tree.add(test_block(1, 0, 1)).unwrap();

        tree.record_poll(&tally_of(&[(1, 5)]), &p);
        tree.record_poll(&tally_of(&[(1, 5)]), &p);
        assert_eq!(tree.confidence(&test_block_id(1)), Some(2));

        // All-failures poll (e.g. timeout): preference holds, counter resets.
        tree.record_poll(&Tally::new(), &p);
        assert_eq!(tree.preference(), test_block_id(1));
        assert_eq!(tree.confidence(&test_block_id(1)), Some(0));
    }

    #[test]
    fn preference_quorum_without_confidence_quorum_resets() {
        let p = params(3, 5, 2, 3);
        let mut tree = genesis_tree();
        tree.add(test_block(1, 0, 1)).unwrap();

        tree.record_poll(&tally_of(&[(1, 5)]), &p);
        assert_eq!(tree.confidence(&test_block_id(1)), Some(1));

        // 4 votes: ≥ αₚ=3 keeps the preference, < α_c=5 resets confidence.
        tree.record_poll(&tally_of(&[(1, 4)]), &p);
        assert_eq!(tree.preference(), test_block_id(1));
        assert_eq!(tree.confidence(&test_block_id(1)), Some(0));
    }

    #[test]
    fn accept_cascades_down_the_preferred_path() {
        let p = params(4, 4, 2, 3);
        let mut tree = genesis_tree();
        tree.add(test_block(1, 0, 1)).unwrap();
        tree.add(test_block(2, 1, 2)).unwrap();

        // Unanimous polls on the deep tip grow confidence on the whole path.
        tree.record_poll(&tally_of(&[(2, 5)]), &p);
        tree.record_poll(&tally_of(&[(2, 5)]), &p);

        let outcome = tree.accept(&p);
        let accepted: Vec<BlockId> = outcome.accepted.iter().map(|b| b.id).collect();
        assert_eq!(accepted, vec![test_block_id(1), test_block_id(2)]);
        assert_eq!(tree.processing(), 0);
        assert_eq!(tree.last_accepted().id, test_block_id(2));
    }

    #[test]
    fn rejection_order_is_deterministic() {
        let p = params(4, 4, 2, 3);
        let mut tree = genesis_tree();
        // Children of genesis: 5, 3, 1 (inserted out of order), each with a
        // child of its own; block 1 wins.
        tree.add(test_block(5, 0, 1)).unwrap();
        tree.add(test_block(3, 0, 1)).unwrap();
        tree.add(test_block(1, 0, 1)).unwrap();
        tree.add(test_block(6, 5, 2)).unwrap();
        tree.add(test_block(4, 3, 2)).unwrap();

        tree.record_poll(&tally_of(&[(1, 5)]), &p);
        tree.record_poll(&tally_of(&[(1, 5)]), &p);
        tree.record_poll(&tally_of(&[(1, 5)]), &p);

        let outcome = tree.accept(&p);
        assert_eq!(outcome.accepted.len(), 1);
        let rejected: Vec<BlockId> = outcome.rejected.iter().map(|b| b.id).collect();
        // Siblings in increasing id order, each subtree parent-first.
        assert_eq!(
            rejected,
            vec![
                test_block_id(3),
                test_block_id(4),
                test_block_id(5),
                test_block_id(6),
            ]
        );
    }

    #[test]
    fn rogue_blocks_need_beta_rogue() {
        let p = params(3, 3, 1, 3);
        let mut tree = genesis_tree();
        tree.add(test_block(1, 0, 1)).unwrap();
        tree.add(test_block(2, 0, 1)).unwrap();

        // One success would finalize a virtuous block (β_v=1) but these are
        // rogue (β_r=3).
        tree.record_poll(&tally_of(&[(1, 5)]), &p);
        assert!(tree.accept(&p).is_empty());
        tree.record_poll(&tally_of(&[(1, 5)]), &p);
        assert!(tree.accept(&p).is_empty());
        tree.record_poll(&tally_of(&[(1, 5)]), &p);
        assert_eq!(tree.accept(&p).accepted.len(), 1);
    }

    #[test]
    fn preference_at_height_walks_preferred_path() {
        let mut tree = genesis_tree();
        tree.add(test_block(1, 0, 1)).unwrap();
        tree.add(test_block(2, 1, 2)).unwrap();
        tree.add(test_block(9, 0, 1)).unwrap();

        assert_eq!(tree.preference_at_height(0), Some(test_block_id(0)));
        assert_eq!(tree.preference_at_height(1), Some(test_block_id(1)));
        assert_eq!(tree.preference_at_height(2), Some(test_block_id(2)));
        assert_eq!(tree.preference_at_height(3), None);
    }

    #[test]
    fn quorum_for_unknown_block_changes_nothing() {
        let p = params(3, 3, 2, 3);
        let mut tree = genesis_tree();
        tree.add(test_block(1, 0, 1)).unwrap();
        tree.record_poll(&tally_of(&[(1, 5)]), &p);
        assert_eq!(tree.confidence(&test_block_id(1)), Some(1));

        // Unanimous vote for a block we never saw: preference holds,
        // confidence resets (the poll was not a success for our path).
        tree.record_poll(&tally_of(&[(42, 5)]), &p);
        assert_eq!(tree.preference(), test_block_id(1));
        assert_eq!(tree.confidence(&test_block_id(1)), Some(0));
    }
}
