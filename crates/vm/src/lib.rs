//! The VM boundary.
//!
//! The engine talks to its virtual machine through [`ChainVm`] and nothing
//! else. The runner owns the VM instance: the state machine only ever sees
//! delegated actions (`ParseBlock`, `VerifyBlock`, `BuildBlock`, ...) and
//! their callback events, so a slow VM can never stall the event loop.
//!
//! [`MemoryVm`] is the deterministic in-memory implementation used by the
//! simulation runner and tests.

mod memory;

pub use memory::MemoryVm;

use snowfall_types::{Block, BlockId};

/// VM-side failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// The bytes do not decode to a block.
    #[error("parse error: {0}")]
    Parse(String),

    /// The block decodes but is not valid on top of its parent.
    #[error("verify error: {0}")]
    Verify(String),

    /// The requested block is not known to the VM.
    #[error("block {0} not found")]
    NotFound(BlockId),
}

/// The narrow interface between the consensus engine and its VM.
///
/// `parse_block` is deterministic and must not mutate state. `verify` may
/// be expensive; the engine only polls a verified block. `accept`/`reject`
/// notify the outcome so the VM can commit or discard its own state.
pub trait ChainVm {
    /// Decode block bytes. Deterministic; must not mutate state.
    fn parse_block(&self, bytes: &[u8]) -> Result<Block, VmError>;

    /// Fetch a block the VM knows about (accepted or pending).
    fn get_block(&self, id: &BlockId) -> Result<Block, VmError>;

    /// Check a block is valid on top of its (already known) parent.
    fn verify(&mut self, block: &Block) -> Result<(), VmError>;

    /// Consensus accepted the block; commit it.
    fn accept(&mut self, block: &Block);

    /// Consensus rejected the block; discard it.
    fn reject(&mut self, block: &Block);

    /// The id of the last accepted block.
    fn last_accepted(&self) -> BlockId;

    /// Build a block on the current tip, if this VM has anything to
    /// propose.
    fn build_block(&mut self) -> Option<Block>;
}
