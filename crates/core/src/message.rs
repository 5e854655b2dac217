//! Outbound message types for network communication.
//!
//! These are the peer-protocol messages the engine can send. The wire
//! encoding is the transport's concern; the semantic contract lives here.

use snowfall_types::{BlockHeight, BlockId, ChainId, RequestId};

/// Outbound network messages.
///
/// The runner handles the actual network I/O.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Poll a peer for its preference under `block_id`.
    PullQuery {
        chain_id: ChainId,
        request_id: RequestId,
        block_id: BlockId,
        requested_height: BlockHeight,
    },

    /// Poll a peer, pushing the block bytes so it need not fetch them.
    PushQuery {
        chain_id: ChainId,
        request_id: RequestId,
        block_bytes: Vec<u8>,
        requested_height: BlockHeight,
    },

    /// Answer to a query: our current preference.
    Chits {
        chain_id: ChainId,
        request_id: RequestId,
        preferred_id: BlockId,
        preferred_id_at_height: BlockId,
        accepted_id: BlockId,
    },

    /// Ask a peer for a block by id.
    Get {
        chain_id: ChainId,
        request_id: RequestId,
        block_id: BlockId,
    },

    /// Deliver a block a peer asked for.
    Put {
        chain_id: ChainId,
        request_id: RequestId,
        block_bytes: Vec<u8>,
    },

    /// We cannot serve a peer's `Get`.
    GetFailed {
        chain_id: ChainId,
        request_id: RequestId,
    },

    /// Ask a peer for a block's ancestry, newest first.
    GetAncestors {
        chain_id: ChainId,
        request_id: RequestId,
        block_id: BlockId,
        max_containers: usize,
    },

    /// Deliver an ancestry chunk a peer asked for.
    Ancestors {
        chain_id: ChainId,
        request_id: RequestId,
        containers: Vec<Vec<u8>>,
    },
}

impl OutboundMessage {
    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::PullQuery { .. } => "PullQuery",
            OutboundMessage::PushQuery { .. } => "PushQuery",
            OutboundMessage::Chits { .. } => "Chits",
            OutboundMessage::Get { .. } => "Get",
            OutboundMessage::Put { .. } => "Put",
            OutboundMessage::GetFailed { .. } => "GetFailed",
            OutboundMessage::GetAncestors { .. } => "GetAncestors",
            OutboundMessage::Ancestors { .. } => "Ancestors",
        }
    }

    /// The request id this message belongs to.
    pub fn request_id(&self) -> RequestId {
        match self {
            OutboundMessage::PullQuery { request_id, .. }
            | OutboundMessage::PushQuery { request_id, .. }
            | OutboundMessage::Chits { request_id, .. }
            | OutboundMessage::Get { request_id, .. }
            | OutboundMessage::Put { request_id, .. }
            | OutboundMessage::GetFailed { request_id, .. }
            | OutboundMessage::GetAncestors { request_id, .. }
            | OutboundMessage::Ancestors { request_id, .. } => *request_id,
        }
    }

    /// Check if this message opens a request we expect an answer to.
    pub fn expects_response(&self) -> bool {
        matches!(
            self,
            OutboundMessage::PullQuery { .. }
                | OutboundMessage::PushQuery { .. }
                | OutboundMessage::Get { .. }
                | OutboundMessage::GetAncestors { .. }
        )
    }

    /// Check if this message answers a peer's request.
    pub fn is_response(&self) -> bool {
        !self.expects_response()
    }
}
