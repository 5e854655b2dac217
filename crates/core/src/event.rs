//! Event types for the deterministic state machine.

use snowfall_types::{Block, BlockHeight, BlockId, NodeId, RequestId, ValidatorSet};

/// Priority levels for event ordering within the same timestamp.
///
/// Events at the same simulation time are processed in priority order.
/// Lower values = higher priority (processed first).
///
/// This ensures causality is preserved: internal events (consequences of
/// processing an event) are handled before new external inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Internal events: consequences of prior event processing.
    /// Processed first to maintain causality.
    Internal = 0,

    /// Timer events: scheduled by the node itself.
    Timer = 1,

    /// Network events: external inputs from other nodes.
    Network = 2,

    /// Client events: external inputs from users or the local proposer.
    Client = 3,
}

/// All possible events a chain can receive.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers (priority: Timer)
    // ═══════════════════════════════════════════════════════════════════════
    /// The deadline for an outstanding request passed.
    ///
    /// Every peer still owing a response to this request is treated as
    /// failed. Failures never count as votes for any block.
    RequestExpired { request_id: RequestId },

    /// Bootstrap progress watchdog fired.
    BootstrapWatchdog,

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// A peer answered one of our queries with its current preference.
    ChitsReceived {
        peer: NodeId,
        request_id: RequestId,
        /// The peer's preferred tip under the queried ancestor.
        preferred_id: BlockId,
        /// The peer's preference at the height we asked about.
        preferred_id_at_height: BlockId,
        /// The peer's last accepted block.
        accepted_id: BlockId,
    },

    /// The transport reported that a peer will not answer a request
    /// (disconnected, benched, or returned garbage).
    QueryFailed { peer: NodeId, request_id: RequestId },

    /// A peer is polling us by block id.
    PullQueryReceived {
        peer: NodeId,
        request_id: RequestId,
        block_id: BlockId,
        requested_height: BlockHeight,
    },

    /// A peer is polling us and pushed the block bytes along.
    PushQueryReceived {
        peer: NodeId,
        request_id: RequestId,
        block_bytes: Vec<u8>,
        requested_height: BlockHeight,
    },

    /// A peer delivered a block we asked for with `Get`.
    ///
    /// Inbound `Get` and `GetAncestors` requests never reach the state
    /// machine: the runner answers them from storage, the way the original
    /// serves all gets outside the engine.
    PutReceived {
        peer: NodeId,
        request_id: RequestId,
        block_bytes: Vec<u8>,
    },

    /// A peer could not serve our `Get`.
    GetFailedReceived { peer: NodeId, request_id: RequestId },

    /// A peer delivered an ancestry chunk we asked for with `GetAncestors`.
    ///
    /// Containers are block bytes ordered child-first, as the original
    /// protocol delivers them.
    AncestorsReceived {
        peer: NodeId,
        request_id: RequestId,
        containers: Vec<Vec<u8>>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // VM Callbacks (priority: Internal)
    // Results from delegated work (parse, verify, build)
    // ═══════════════════════════════════════════════════════════════════════
    /// Block parse completed.
    ///
    /// Callback from `Action::ParseBlock`. `None` means the bytes did not
    /// parse; the sending peer's message is dropped. `solicited` mirrors
    /// the request: true when the bytes answered one of our own requests.
    BlockParsed {
        peer: NodeId,
        request_id: RequestId,
        block: Option<Block>,
        solicited: bool,
    },

    /// Ancestry chunk parse completed.
    ///
    /// Callback from `Action::ParseAncestors`. `None` means some container
    /// failed to parse, which rejects the peer's whole message.
    AncestorsParsed {
        peer: NodeId,
        request_id: RequestId,
        blocks: Option<Vec<Block>>,
    },

    /// Block verification completed.
    ///
    /// Callback from `Action::VerifyBlock`. An invalid block is dropped
    /// before it ever enters the preference tree; no vote counts for it.
    BlockVerified { block: Block, valid: bool },

    /// The VM finished building a block we asked for.
    ///
    /// Callback from `Action::BuildBlock`. `None` means the VM had nothing
    /// to build.
    BlockBuilt { block: Option<Block> },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal Events (priority: Internal)
    // ═══════════════════════════════════════════════════════════════════════
    /// Bootstrap reached the beacon-agreed tip; normal polling may begin.
    BootstrapCompleted {
        tip_id: BlockId,
        tip_height: BlockHeight,
    },

    /// The VM delivered a fresh validator snapshot at an epoch boundary.
    ValidatorSetUpdated { validators: ValidatorSet },

    // ═══════════════════════════════════════════════════════════════════════
    // Client Requests (priority: Client)
    // ═══════════════════════════════════════════════════════════════════════
    /// A locally produced block was submitted for consensus.
    BlockSubmitted { block: Block },
}

impl Event {
    /// Get the priority for this event type.
    ///
    /// Events at the same timestamp are processed in priority order,
    /// ensuring causality is preserved.
    pub fn priority(&self) -> EventPriority {
        match self {
            // Internal events (processed first at same time)
            Event::BlockParsed { .. }
            | Event::AncestorsParsed { .. }
            | Event::BlockVerified { .. }
            | Event::BlockBuilt { .. }
            | Event::BootstrapCompleted { .. }
            | Event::ValidatorSetUpdated { .. } => EventPriority::Internal,

            // Timer events
            Event::RequestExpired { .. } | Event::BootstrapWatchdog => EventPriority::Timer,

            // Network events
            Event::ChitsReceived { .. }
            | Event::QueryFailed { .. }
            | Event::PullQueryReceived { .. }
            | Event::PushQueryReceived { .. }
            | Event::PutReceived { .. }
            | Event::GetFailedReceived { .. }
            | Event::AncestorsReceived { .. } => EventPriority::Network,

            // Client events (processed last at same time)
            Event::BlockSubmitted { .. } => EventPriority::Client,
        }
    }

    /// Check if this is an internal event (consequence of prior processing).
    pub fn is_internal(&self) -> bool {
        self.priority() == EventPriority::Internal
    }

    /// Check if this is a network event (from another node).
    pub fn is_network(&self) -> bool {
        self.priority() == EventPriority::Network
    }

    /// Get the event type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::RequestExpired { .. } => "RequestExpired",
            Event::BootstrapWatchdog => "BootstrapWatchdog",
            Event::ChitsReceived { .. } => "ChitsReceived",
            Event::QueryFailed { .. } => "QueryFailed",
            Event::PullQueryReceived { .. } => "PullQueryReceived",
            Event::PushQueryReceived { .. } => "PushQueryReceived",
            Event::PutReceived { .. } => "PutReceived",
            Event::GetFailedReceived { .. } => "GetFailedReceived",
            Event::AncestorsReceived { .. } => "AncestorsReceived",
            Event::BlockParsed { .. } => "BlockParsed",
            Event::AncestorsParsed { .. } => "AncestorsParsed",
            Event::BlockVerified { .. } => "BlockVerified",
            Event::BlockBuilt { .. } => "BlockBuilt",
            Event::BootstrapCompleted { .. } => "BootstrapCompleted",
            Event::ValidatorSetUpdated { .. } => "ValidatorSetUpdated",
            Event::BlockSubmitted { .. } => "BlockSubmitted",
        }
    }
}
