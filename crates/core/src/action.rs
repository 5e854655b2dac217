//! Action types for the deterministic state machine.

use crate::{message::OutboundMessage, Event, TimerId};
use snowfall_types::{Block, NodeId, RequestId};
use std::time::Duration;

/// Actions the state machine wants to perform.
///
/// Actions are **commands** - they describe something to do.
/// The runner executes actions and may convert results back into events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Send a message to a single peer.
    ///
    /// Non-blocking; delivery failure surfaces later as `Event::QueryFailed`
    /// for messages that expect a response.
    Send { to: NodeId, message: OutboundMessage },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Set a timer to fire after a duration.
    SetTimer { id: TimerId, duration: Duration },

    /// Cancel a previously set timer.
    CancelTimer { id: TimerId },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal (fed back as events with Internal priority)
    // ═══════════════════════════════════════════════════════════════════════
    /// Enqueue an internal event for immediate processing.
    ///
    /// Internal events are processed at the same timestamp with higher
    /// priority than external events, preserving causality.
    EnqueueInternal { event: Event },

    // ═══════════════════════════════════════════════════════════════════════
    // Delegated Work (async, returns callback event)
    // The VM may block arbitrarily; the runner keeps it off the event loop.
    // ═══════════════════════════════════════════════════════════════════════
    /// Parse block bytes via the VM.
    ///
    /// Returns `Event::BlockParsed` when complete. Parsing is deterministic
    /// and must not mutate VM state. `solicited` is true when the bytes
    /// answer one of our own requests, so the callback can be matched
    /// against our request ids rather than the peer's.
    ParseBlock {
        peer: NodeId,
        request_id: RequestId,
        bytes: Vec<u8>,
        solicited: bool,
    },

    /// Parse an ancestry chunk via the VM.
    ///
    /// Returns `Event::AncestorsParsed` when complete. One bad container
    /// invalidates the whole chunk.
    ParseAncestors {
        peer: NodeId,
        request_id: RequestId,
        containers: Vec<Vec<u8>>,
    },

    /// Verify a block via the VM.
    ///
    /// Returns `Event::BlockVerified` when complete. The engine only polls
    /// verified blocks.
    VerifyBlock { block: Block },

    /// Ask the VM to build a block on the current preferred tip.
    ///
    /// Returns `Event::BlockBuilt` when complete.
    BuildBlock,

    // ═══════════════════════════════════════════════════════════════════════
    // VM Notifications
    // ═══════════════════════════════════════════════════════════════════════
    /// Tell the VM a block was accepted; the VM commits its own state.
    NotifyAccepted { block: Block },

    /// Tell the VM a block was rejected.
    NotifyRejected { block: Block },

    // ═══════════════════════════════════════════════════════════════════════
    // Storage
    // ═══════════════════════════════════════════════════════════════════════
    /// Persist an accepted block.
    ///
    /// The write is atomic: block bytes, the height index, and pruning marks
    /// for discarded subtrees commit together or the block stays
    /// un-accepted on disk.
    PersistAccepted { block: Block },

    // ═══════════════════════════════════════════════════════════════════════
    // External Notifications
    // ═══════════════════════════════════════════════════════════════════════
    /// Emit an accepted block for external observers.
    EmitAcceptedBlock { block: Block },
}

impl Action {
    /// Check if this action is delegated work (runs outside the loop,
    /// returns a callback event).
    pub fn is_delegated(&self) -> bool {
        matches!(
            self,
            Action::ParseBlock { .. }
                | Action::ParseAncestors { .. }
                | Action::VerifyBlock { .. }
                | Action::BuildBlock
        )
    }

    /// Check if this is a network send.
    pub fn is_send(&self) -> bool {
        matches!(self, Action::Send { .. })
    }

    /// Check if this is a storage write action.
    pub fn is_storage_write(&self) -> bool {
        matches!(self, Action::PersistAccepted { .. })
    }

    /// Get the action type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Send { .. } => "Send",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::EnqueueInternal { .. } => "EnqueueInternal",
            Action::ParseBlock { .. } => "ParseBlock",
            Action::ParseAncestors { .. } => "ParseAncestors",
            Action::VerifyBlock { .. } => "VerifyBlock",
            Action::BuildBlock => "BuildBlock",
            Action::NotifyAccepted { .. } => "NotifyAccepted",
            Action::NotifyRejected { .. } => "NotifyRejected",
            Action::PersistAccepted { .. } => "PersistAccepted",
            Action::EmitAcceptedBlock { .. } => "EmitAcceptedBlock",
        }
    }
}
