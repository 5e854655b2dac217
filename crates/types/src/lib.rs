//! Core types for Snowfall consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Identifiers**: [`BlockId`], [`NodeId`], [`ChainId`], [`BlockHeight`],
//!   [`RequestId`]
//! - **Consensus types**: [`Block`] and its deterministic byte codec
//! - **Validators**: [`Validator`], [`ValidatorSet`] (weighted, snapshot
//!   semantics)
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod block;
mod ids;
mod validators;

pub use block::{Block, BlockCodecError};
pub use ids::{BlockHeight, BlockId, ChainId, HexError, NodeId, RequestId};
pub use validators::{Validator, ValidatorSet};

/// Gas is the one-dimensional complexity unit blocks are metered in.
pub type Gas = u64;

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Create a test NodeId from a seed byte.
    pub fn test_node(seed: u8) -> NodeId {
        NodeId([seed; 20])
    }

    /// Create a test BlockId from a seed byte.
    pub fn test_block_id(seed: u8) -> BlockId {
        BlockId([seed; 32])
    }

    /// Create a block with the given id/parent/height and no payload.
    pub fn test_block(id: u8, parent: u8, height: u64) -> Block {
        Block {
            id: test_block_id(id),
            parent_id: test_block_id(parent),
            height: BlockHeight(height),
            timestamp: height,
            gas_used: 0,
            payload: Vec::new(),
        }
    }

    /// A validator set of `n` nodes, all with weight 1.
    pub fn test_validator_set(n: u8) -> ValidatorSet {
        ValidatorSet::new((0..n).map(|i| Validator {
            node_id: test_node(i),
            weight: 1,
        }))
    }
}
