//! Deterministic in-memory VM.

use crate::{ChainVm, VmError};
use snowfall_types::{Block, BlockHeight, BlockId, Gas};
use std::collections::HashMap;
use tracing::{debug, trace};

/// An in-memory [`ChainVm`] for tests and simulation.
///
/// Blocks carry no semantics beyond linkage: verification checks parent
/// knowledge, height continuity, and timestamp monotonicity. Building is
/// deterministic, so two proposer VMs with the same view build the same
/// block.
#[derive(Debug)]
pub struct MemoryVm {
    /// Accepted chain, by id.
    accepted: HashMap<BlockId, Block>,

    /// Verified-but-undecided blocks.
    pending: HashMap<BlockId, Block>,

    last_accepted: BlockId,

    /// Highest verified block; where the next block is built.
    tip: BlockId,

    /// Whether this VM proposes blocks when asked. The surrounding
    /// harness decides who proposes; a non-proposer always builds `None`.
    proposer: bool,

    /// Gas stamped on each built block.
    build_gas: Gas,

    /// Wall time injected by the runner, unix seconds.
    now: u64,
}

impl MemoryVm {
    /// Create a VM whose chain starts at `genesis`.
    pub fn new(genesis: Block) -> Self {
        let id = genesis.id;
        let mut accepted = HashMap::new();
        accepted.insert(id, genesis);
        Self {
            accepted,
            pending: HashMap::new(),
            last_accepted: id,
            tip: id,
            proposer: false,
            build_gas: 0,
            now: 0,
        }
    }

    /// Mark this VM as a proposer.
    pub fn with_proposer(mut self, proposer: bool) -> Self {
        self.proposer = proposer;
        self
    }

    /// Gas consumption stamped on built blocks.
    pub fn with_build_gas(mut self, gas: Gas) -> Self {
        self.build_gas = gas;
        self
    }

    /// Inject the current time (unix seconds).
    pub fn set_time(&mut self, now: u64) {
        self.now = now;
    }

    /// Number of accepted blocks, genesis included.
    pub fn accepted_len(&self) -> usize {
        self.accepted.len()
    }

    /// The accepted block at the tip of the chain.
    pub fn last_accepted_block(&self) -> &Block {
        &self.accepted[&self.last_accepted]
    }

    fn lookup(&self, id: &BlockId) -> Option<&Block> {
        self.accepted.get(id).or_else(|| self.pending.get(id))
    }

    /// Deterministic id for a built block: a cheap mix of the parent id,
    /// height, and timestamp. Not cryptographic; collision-free enough for
    /// a test VM.
    fn derive_id(parent: &BlockId, height: u64, timestamp: u64) -> BlockId {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(parent.as_bytes());
        for (i, b) in height.to_le_bytes().into_iter().enumerate() {
            bytes[i] ^= b.wrapping_mul(0x9e).wrapping_add(1);
        }
        for (i, b) in timestamp.to_le_bytes().into_iter().enumerate() {
            bytes[8 + i] ^= b.rotate_left(3).wrapping_add(0x5b);
        }
        bytes[31] = bytes[31].wrapping_add(height as u8).wrapping_add(1);
        BlockId(bytes)
    }
}

impl ChainVm for MemoryVm {
    fn parse_block(&self, bytes: &[u8]) -> Result<Block, VmError> {
        Block::from_bytes(bytes).map_err(|e| VmError::Parse(e.to_string()))
    }

    fn get_block(&self, id: &BlockId) -> Result<Block, VmError> {
        self.lookup(id).cloned().ok_or(VmError::NotFound(*id))
    }

    fn verify(&mut self, block: &Block) -> Result<(), VmError> {
        let Some(parent) = self.lookup(&block.parent_id) else {
            return Err(VmError::Verify(format!(
                "unknown parent {}",
                block.parent_id
            )));
        };
        if block.height.0 != parent.height.0 + 1 {
            return Err(VmError::Verify(format!(
                "height {} does not extend parent height {}",
                block.height.0, parent.height.0
            )));
        }
        if block.timestamp < parent.timestamp {
            return Err(VmError::Verify(format!(
                "timestamp {} before parent timestamp {}",
                block.timestamp, parent.timestamp
            )));
        }

        self.pending.insert(block.id, block.clone());
        if self.lookup(&self.tip).map(|b| b.height) < Some(block.height) {
            self.tip = block.id;
        }
        trace!(block = ?block.id, height = block.height.0, "verified block");
        Ok(())
    }

    fn accept(&mut self, block: &Block) {
        // Accepting out of parent order is an engine bug, not a peer error.
        assert_eq!(
            block.parent_id, self.last_accepted,
            "accepting {} whose parent is not the accepted tip",
            block.id
        );
        self.pending.remove(&block.id);
        self.accepted.insert(block.id, block.clone());
        self.last_accepted = block.id;
        if self.lookup(&self.tip).is_none() {
            self.tip = block.id;
        }
        debug!(block = ?block.id, height = block.height.0, "VM accepted block");
    }

    fn reject(&mut self, block: &Block) {
        self.pending.remove(&block.id);
        if self.tip == block.id {
            self.tip = self.last_accepted;
        }
        debug!(block = ?block.id, "VM rejected block");
    }

    fn last_accepted(&self) -> BlockId {
        self.last_accepted
    }

    fn build_block(&mut self) -> Option<Block> {
        if !self.proposer {
            return None;
        }
        let parent = self.lookup(&self.tip).cloned()?;
        let height = parent.height.0 + 1;
        let timestamp = self.now.max(parent.timestamp);
        let block = Block {
            id: Self::derive_id(&parent.id, height, timestamp),
            parent_id: parent.id,
            height: BlockHeight(height),
            timestamp,
            gas_used: self.build_gas,
            payload: Vec::new(),
        };
        if self.lookup(&block.id).is_some() {
            // Same parent, height, and second as an existing block; nothing
            // new to propose.
            return None;
        }
        trace!(block = ?block.id, height, "VM built block");
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snowfall_types::test_utils::test_block;

    fn vm() -> MemoryVm {
        MemoryVm::new(test_block(0, 255, 0)).with_proposer(true)
    }

    #[test]
    fn parse_round_trips_built_blocks() {
        let mut vm = vm();
        vm.set_time(10);
        let block = vm.build_block().unwrap();
        let parsed = vm.parse_block(&block.bytes()).unwrap();
        assert_eq!(parsed, block);
    }

    #[test]
    fn verify_rejects_unknown_parent() {
        let mut vm = vm();
        let orphan = test_block(9, 8, 1);
        assert!(matches!(vm.verify(&orphan), Err(VmError::Verify(_))));
    }

    #[test]
    fn verify_rejects_time_regression() {
        let mut vm = MemoryVm::new(Block {
            timestamp: 100,
            ..test_block(0, 255, 0)
        });
        let child = Block {
            timestamp: 99,
            ..test_block(1, 0, 1)
        };
        let err = vm.verify(&child).unwrap_err();
        assert!(matches!(err, VmError::Verify(msg) if msg.contains("before parent")));
    }

    #[test]
    fn build_verify_accept_extends_chain() {
        let mut vm = vm();
        vm.set_time(5);
        let b1 = vm.build_block().unwrap();
        vm.verify(&b1).unwrap();
        vm.accept(&b1);
        assert_eq!(vm.last_accepted(), b1.id);

        vm.set_time(6);
        let b2 = vm.build_block().unwrap();
        assert_eq!(b2.parent_id, b1.id);
        assert_eq!(b2.height.0, 2);
        vm.verify(&b2).unwrap();
        vm.accept(&b2);
        assert_eq!(vm.accepted_len(), 3);
    }

    #[test]
    fn building_is_deterministic_across_vms() {
        let mut a = vm();
        let mut b = vm();
        a.set_time(7);
        b.set_time(7);
        assert_eq!(a.build_block(), b.build_block());
    }

    #[test]
    fn non_proposer_builds_nothing() {
        let mut vm = MemoryVm::new(test_block(0, 255, 0));
        vm.set_time(5);
        assert_eq!(vm.build_block(), None);
    }

    #[test]
    #[should_panic(expected = "whose parent is not the accepted tip")]
    fn accepting_out_of_order_panics() {
        let mut vm = vm();
        vm.set_time(5);
        let b1 = vm.build_block().unwrap();
        vm.verify(&b1).unwrap();
        vm.set_time(6);
        let b2 = vm.build_block().unwrap();
        vm.verify(&b2).unwrap();
        // b2 is the grandchild; accepting it before b1 breaks the invariant.
        vm.accept(&b2);
    }
}
