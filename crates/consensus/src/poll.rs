//! Poll lifecycle: open, collect responses, terminate, deliver in order.

use crate::Tally;
use snowfall_types::{BlockHeight, BlockId, NodeId, RequestId};
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;
use tracing::{debug, trace};

/// One outstanding poll: a query about `block_id` sent to a sampled set of
/// peers under a single request id.
///
/// State machine per poll: `OPEN → (all responses | timeout) → CLOSED`.
/// Once closed, responses addressed to its request id are discarded.
#[derive(Debug)]
pub struct Poll {
    request_id: RequestId,
    block_id: BlockId,
    requested_height: BlockHeight,
    /// Sampled peers that still owe a response.
    pending: BTreeSet<NodeId>,
    tally: Tally,
    issued_at: Duration,
    finished: bool,
}

impl Poll {
    /// The request id shared by every query of this poll.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// The block the poll asked about.
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Height of the queried block.
    pub fn requested_height(&self) -> BlockHeight {
        self.requested_height
    }

    /// When the poll was opened.
    pub fn issued_at(&self) -> Duration {
        self.issued_at
    }

    /// The closed poll's tally.
    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    /// Consume the poll, returning its tally.
    pub fn into_tally(self) -> Tally {
        self.tally
    }

    fn check_finished(&mut self) {
        if self.pending.is_empty() {
            self.finished = true;
        }
    }
}

/// The set of open polls for one chain.
///
/// Guarantees:
/// - at most `concurrent_repolls` polls are open (enforced by the caller via
///   [`PollSet::len`]),
/// - request ids increase monotonically, so open order and id order agree,
/// - every opened poll is delivered exactly once, in open order, even when a
///   later poll terminates first,
/// - responses for a terminated or unknown poll are dropped.
#[derive(Debug, Default)]
pub struct PollSet {
    /// Open and terminated-but-undelivered polls, in open order.
    polls: VecDeque<Poll>,
    next_request_id: u32,
}

impl PollSet {
    /// An empty poll set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of undelivered polls.
    pub fn len(&self) -> usize {
        self.polls.len()
    }

    /// True if no polls are outstanding.
    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }

    /// Allocate a request id without opening a poll.
    ///
    /// Used for `Get`/`GetAncestors` requests that share the id space with
    /// queries so a peer sees unique ids across all our outstanding
    /// requests.
    pub fn allocate_request_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request_id);
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    /// Open a poll about `block_id` against the sampled `peers`.
    pub fn open(
        &mut self,
        block_id: BlockId,
        requested_height: BlockHeight,
        peers: &[NodeId],
        now: Duration,
    ) -> RequestId {
        let request_id = self.allocate_request_id();
        debug!(
            %request_id,
            block = ?block_id,
            sampled = peers.len(),
            "opening poll"
        );
        self.polls.push_back(Poll {
            request_id,
            block_id,
            requested_height,
            pending: peers.iter().copied().collect(),
            tally: Tally::new(),
            issued_at: now,
            finished: false,
        });
        request_id
    }

    fn poll_mut(&mut self, request_id: RequestId) -> Option<&mut Poll> {
        self.polls
            .iter_mut()
            .find(|p| p.request_id == request_id && !p.finished)
    }

    /// Record a peer's vote. Returns false if the poll is closed, the peer
    /// was not sampled, or it already answered; such responses are dropped.
    pub fn record_vote(&mut self, request_id: RequestId, peer: NodeId, vote: BlockId) -> bool {
        let Some(poll) = self.poll_mut(request_id) else {
            trace!(%request_id, ?peer, "dropping vote for closed or unknown poll");
            return false;
        };
        if !poll.pending.remove(&peer) {
            trace!(%request_id, ?peer, "dropping duplicate or unsampled vote");
            return false;
        }
        poll.tally.add_vote(vote, 1);
        poll.check_finished();
        true
    }

    /// Record that a peer will not answer. Returns false if dropped.
    pub fn record_failure(&mut self, request_id: RequestId, peer: NodeId) -> bool {
        let Some(poll) = self.poll_mut(request_id) else {
            return false;
        };
        if !poll.pending.remove(&peer) {
            return false;
        }
        poll.tally.add_failure(1);
        poll.check_finished();
        true
    }

    /// Expire a poll: every peer still owing a response is counted as a
    /// failure and the poll terminates. Returns false for unknown or
    /// already-terminated polls.
    pub fn expire(&mut self, request_id: RequestId) -> bool {
        let Some(poll) = self.poll_mut(request_id) else {
            return false;
        };
        let missing = poll.pending.len();
        for _ in 0..missing {
            poll.tally.add_failure(1);
        }
        poll.pending.clear();
        poll.finished = true;
        debug!(%request_id, missing, "poll expired");
        true
    }

    /// Request ids of polls that are still open (not yet terminated).
    pub fn open_request_ids(&self) -> Vec<RequestId> {
        self.polls
            .iter()
            .filter(|p| !p.finished)
            .map(|p| p.request_id)
            .collect()
    }

    /// Drain terminated polls **in open order**.
    ///
    /// A poll that terminated out of order is held back until every poll
    /// opened before it has terminated too; this is what keeps
    /// `record_poll` ordering identical across replicas fed the same trace.
    pub fn drain_finished(&mut self) -> Vec<Poll> {
        let mut finished = Vec::new();
        while self.polls.front().is_some_and(|p| p.finished) {
            finished.push(self.polls.pop_front().expect("front checked"));
        }
        finished
    }
}
