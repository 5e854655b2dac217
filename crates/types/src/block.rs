//! Block value type and its byte codec.

use crate::{BlockHeight, BlockId, Gas};

/// A block as seen by the consensus engine.
///
/// Blocks are immutable once created. The engine never interprets `payload`;
/// the VM does. The invariant `height == parent.height + 1` (0 for genesis)
/// is enforced by the VM at verify time and asserted by the preference tree
/// at add time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Identifier of this block.
    pub id: BlockId,
    /// Identifier of the parent block.
    pub parent_id: BlockId,
    /// Chain position; parent height + 1, or 0 for genesis.
    pub height: BlockHeight,
    /// Block time in unix seconds. Monotonic per chain: never before the
    /// parent's timestamp.
    pub timestamp: u64,
    /// Total gas consumed by the block's contents, as metered by the VM.
    pub gas_used: Gas,
    /// Opaque VM payload.
    pub payload: Vec<u8>,
}

/// Error decoding a block from bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockCodecError {
    #[error("truncated block: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("trailing bytes after payload: {0}")]
    Trailing(usize),
    #[error("payload length {0} exceeds maximum {max}", max = Block::MAX_PAYLOAD)]
    PayloadTooLarge(usize),
}

impl Block {
    /// Upper bound on payload size accepted by [`Block::from_bytes`].
    pub const MAX_PAYLOAD: usize = 2 * 1024 * 1024;

    const HEADER_LEN: usize = 32 + 32 + 8 + 8 + 8 + 4;

    /// Serialize to the canonical wire layout.
    ///
    /// Fixed-width fields in declaration order, then a u32 length-prefixed
    /// payload. The layout is deterministic so `from_bytes(bytes(b)) == b`.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.payload.len());
        out.extend_from_slice(self.id.as_bytes());
        out.extend_from_slice(self.parent_id.as_bytes());
        out.extend_from_slice(&self.height.0.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.gas_used.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode from the canonical wire layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlockCodecError> {
        if bytes.len() < Self::HEADER_LEN {
            return Err(BlockCodecError::Truncated {
                need: Self::HEADER_LEN,
                have: bytes.len(),
            });
        }

        let mut at = 0usize;
        // `move` copies the slice reference in, so the returned subslices
        // borrow from the input rather than the closure.
        let mut take = move |n: usize| {
            let s = &bytes[at..at + n];
            at += n;
            s
        };

        let id = BlockId(take(32).try_into().expect("length checked"));
        let parent_id = BlockId(take(32).try_into().expect("length checked"));
        let height = BlockHeight(u64::from_le_bytes(take(8).try_into().expect("length checked")));
        let timestamp = u64::from_le_bytes(take(8).try_into().expect("length checked"));
        let gas_used = u64::from_le_bytes(take(8).try_into().expect("length checked"));
        let payload_len =
            u32::from_le_bytes(take(4).try_into().expect("length checked")) as usize;

        if payload_len > Self::MAX_PAYLOAD {
            return Err(BlockCodecError::PayloadTooLarge(payload_len));
        }
        let rest = &bytes[Self::HEADER_LEN..];
        if rest.len() < payload_len {
            return Err(BlockCodecError::Truncated {
                need: Self::HEADER_LEN + payload_len,
                have: bytes.len(),
            });
        }
        if rest.len() > payload_len {
            return Err(BlockCodecError::Trailing(rest.len() - payload_len));
        }

        Ok(Self {
            id,
            parent_id,
            height,
            timestamp,
            gas_used,
            payload: rest.to_vec(),
        })
    }

    /// True for the chain's first block.
    pub fn is_genesis(&self) -> bool {
        self.height.0 == 0
    }
}
