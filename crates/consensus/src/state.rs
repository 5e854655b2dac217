//! The consensus decision machine.
//!
//! This module implements the Snowman decision machine as a synchronous,
//! event-driven model: poll the network about the preferred tip, feed closed
//! polls to the preference tree, and emit accept/reject actions once the β
//! thresholds are met.

use crate::{sampler, EngineConfig, ParametersError, PollSet, PreferenceTree, TreeError};
use rand_chacha::ChaCha8Rng;
use snowfall_core::{Action, Event, OutboundMessage, SubStateMachine, TimerId};
use snowfall_gas::{Calculator, GasError};
use snowfall_types::{Block, BlockHeight, BlockId, NodeId, RequestId, ValidatorSet};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Failure constructing the engine. The chain refuses to start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Parameters(#[from] ParametersError),

    #[error("gas engine: {0}")]
    Gas(#[from] GasError),
}

/// A parsed block waiting for its parent, with an insertion time for TTL
/// expiry.
#[derive(Debug)]
struct PendingBlock {
    block: Block,
    buffered_at: Duration,
}

/// The Snowman decision machine for one chain.
///
/// # State Machine Flow
///
/// 1. **Block arrives** (built, submitted, pushed, or fetched) → VM verify
/// 2. **Block verified** → enter the preference tree, open polls
/// 3. **Chits / failures / timeouts** → feed the poll set
/// 4. **Polls close (in open order)** → preference tree records the tally
/// 5. **β threshold met** → gas check, accept/reject actions, repoll
pub struct ConsensusState {
    // ═══════════════════════════════════════════════════════════════════════════
    // Configuration
    // ═══════════════════════════════════════════════════════════════════════════
    config: EngineConfig,

    /// Validator snapshot; replaced wholesale at epoch boundaries. Open
    /// polls keep the snapshot they were sampled from.
    validators: ValidatorSet,

    // ═══════════════════════════════════════════════════════════════════════════
    // Consensus State
    // ═══════════════════════════════════════════════════════════════════════════
    /// Blocks in flight, anchored at the last accepted block.
    tree: PreferenceTree,

    /// Open polls and the request-id allocator.
    polls: PollSet,

    /// Gas cap / price state, advanced once per accepted block.
    gas: Calculator,

    // ═══════════════════════════════════════════════════════════════════════════
    // Pending State
    // ═══════════════════════════════════════════════════════════════════════════
    /// Parsed blocks waiting for an unknown parent, FIFO with TTL.
    pending_parent: VecDeque<PendingBlock>,

    /// Outstanding `Get` fetches for blocks peers voted on or queried us
    /// about. Maps request id → wanted block.
    outstanding_gets: HashMap<RequestId, BlockId>,

    /// When each in-flight block entered the tree (health: oldest age).
    processing_since: HashMap<BlockId, Duration>,

    /// True while a `BuildBlock` request is outstanding against the VM.
    building: bool,

    /// Timestamp of the last accepted block; the parent time for the next
    /// gas seal.
    last_accepted_timestamp: u64,

    // ═══════════════════════════════════════════════════════════════════════════
    // Randomness & Time
    // ═══════════════════════════════════════════════════════════════════════════
    /// Seeded per replica; replicas must not agree on samples.
    rng: ChaCha8Rng,

    /// Current time (set by runner before each handle call).
    now: Duration,
}

impl std::fmt::Debug for ConsensusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusState")
            .field("chain", &self.config.chain_id)
            .field("last_accepted", &self.tree.last_accepted().id)
            .field("processing", &self.tree.processing())
            .field("open_polls", &self.polls.len())
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl ConsensusState {
    /// Create a decision machine rooted at the last accepted block.
    ///
    /// `gas` carries the gas state as of that block, so a chain resumed
    /// after bootstrap prices blocks identically to one that never
    /// restarted.
    pub fn new(
        config: EngineConfig,
        validators: ValidatorSet,
        last_accepted: Block,
        gas: Calculator,
        rng: ChaCha8Rng,
    ) -> Result<Self, EngineError> {
        config.params.verify()?;
        info!(
            chain = ?config.chain_id,
            root = ?last_accepted.id,
            height = last_accepted.height.0,
            validators = validators.len(),
            "consensus engine initialized"
        );
        let last_accepted_timestamp = last_accepted.timestamp;
        Ok(Self {
            config,
            validators,
            tree: PreferenceTree::new(last_accepted),
            polls: PollSet::new(),
            gas,
            pending_parent: VecDeque::new(),
            outstanding_gets: HashMap::new(),
            processing_since: HashMap::new(),
            building: false,
            last_accepted_timestamp,
            rng,
            now: Duration::ZERO,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════════

    /// The engine's current preference (deepest preferred block id).
    pub fn preference(&self) -> BlockId {
        self.tree.preference()
    }

    /// The last accepted block.
    pub fn last_accepted(&self) -> &Block {
        self.tree.last_accepted()
    }

    /// Number of blocks in flight.
    pub fn processing(&self) -> usize {
        self.tree.processing()
    }

    /// Number of undelivered polls.
    pub fn outstanding_polls(&self) -> usize {
        self.polls.len()
    }

    /// Gas state as of the last accepted block.
    pub fn gas(&self) -> &Calculator {
        &self.gas
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the validator snapshot (epoch boundary).
    pub fn set_validators(&mut self, validators: ValidatorSet) {
        info!(
            old = self.validators.len(),
            new = validators.len(),
            "validator set refreshed"
        );
        self.validators = validators;
    }

    /// Age of the oldest in-flight block.
    pub fn oldest_processing_age(&self) -> Option<Duration> {
        self.processing_since
            .values()
            .map(|since| self.now.saturating_sub(*since))
            .max()
    }

    /// Mark every outstanding request failed and close all polls; called on
    /// chain shutdown before the VM stops. Closed-poll results are
    /// discarded, not recorded.
    pub fn drain(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        for (request_id, _) in self.outstanding_gets.drain() {
            actions.push(Action::CancelTimer {
                id: TimerId::Request(request_id),
            });
        }
        for request_id in self.polls.open_request_ids() {
            self.polls.expire(request_id);
        }
        for poll in self.polls.drain_finished() {
            actions.push(Action::CancelTimer {
                id: TimerId::Request(poll.request_id()),
            });
        }
        debug!("engine drained");
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Block intake
    // ═══════════════════════════════════════════════════════════════════════════

    /// Kick the engine: ask the VM for a block to propose if there is room.
    pub fn start(&mut self) -> Vec<Action> {
        self.maybe_build()
    }

    fn maybe_build(&mut self) -> Vec<Action> {
        if self.building || self.tree.processing() >= self.config.params.optimal_processing {
            return vec![];
        }
        self.building = true;
        vec![Action::BuildBlock]
    }

    fn on_block_built(&mut self, block: Option<Block>) -> Vec<Action> {
        self.building = false;
        match block {
            Some(block) => {
                trace!(block = ?block.id, "VM built block");
                vec![Action::VerifyBlock { block }]
            }
            None => vec![],
        }
    }

    fn on_block_submitted(&mut self, block: Block) -> Vec<Action> {
        if self.tree.contains(&block.id) {
            return vec![];
        }
        vec![Action::VerifyBlock { block }]
    }

    fn on_block_parsed(
        &mut self,
        peer: NodeId,
        request_id: RequestId,
        block: Option<Block>,
        solicited: bool,
    ) -> Vec<Action> {
        let mut actions = Vec::new();
        if solicited {
            if let Some(wanted) = self.outstanding_gets.remove(&request_id) {
                actions.push(Action::CancelTimer {
                    id: TimerId::Request(request_id),
                });
                if let Some(block) = &block {
                    if block.id != wanted {
                        warn!(?peer, got = ?block.id, ?wanted, "peer served the wrong block");
                        return actions;
                    }
                }
            }
        }

        let Some(block) = block else {
            warn!(?peer, %request_id, "block failed to parse, dropping message");
            return actions;
        };

        actions.extend(self.intake(block));
        actions
    }

    /// Route a parsed block: verify it if its parent is known, buffer it
    /// briefly otherwise.
    fn intake(&mut self, block: Block) -> Vec<Action> {
        if self.tree.contains(&block.id) {
            return vec![];
        }
        if self.tree.contains(&block.parent_id) {
            return vec![Action::VerifyBlock { block }];
        }

        trace!(block = ?block.id, parent = ?block.parent_id, "buffering block with unknown parent");
        self.pending_parent.push_back(PendingBlock {
            block,
            buffered_at: self.now,
        });
        while self.pending_parent.len() > self.config.max_pending_blocks {
            let dropped = self.pending_parent.pop_front().expect("len checked");
            debug!(block = ?dropped.block.id, "pending buffer full, dropping oldest");
        }
        vec![]
    }

    fn on_block_verified(&mut self, block: Block, valid: bool) -> Vec<Action> {
        if !valid {
            // VM rejected the block; it never enters the tree and no vote
            // counts for it.
            warn!(block = ?block.id, "block failed VM verification, dropped");
            return vec![];
        }

        let id = block.id;
        match self.tree.add(block) {
            Ok(()) => {
                self.processing_since.insert(id, self.now);
            }
            Err(TreeError::AlreadyKnown(_)) => return vec![],
            Err(err @ TreeError::MissingParent(_)) | Err(err @ TreeError::InvalidHeight { .. }) => {
                warn!(block = ?id, %err, "verified block not addable, dropped");
                return vec![];
            }
        }

        let mut actions = self.release_children_of(id);
        actions.extend(self.issue_polls());
        actions
    }

    /// Verify buffered blocks whose parent just arrived; drop expired ones.
    fn release_children_of(&mut self, parent: BlockId) -> Vec<Action> {
        let ttl = self.config.params.max_item_processing_time;
        let now = self.now;
        let mut actions = Vec::new();
        let mut keep = VecDeque::with_capacity(self.pending_parent.len());

        for pending in self.pending_parent.drain(..) {
            if now.saturating_sub(pending.buffered_at) > ttl {
                debug!(block = ?pending.block.id, "pending block expired, dropped");
            } else if pending.block.parent_id == parent {
                actions.push(Action::VerifyBlock {
                    block: pending.block,
                });
            } else {
                keep.push_back(pending);
            }
        }
        self.pending_parent = keep;
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Polling
    // ═══════════════════════════════════════════════════════════════════════════

    /// Open new polls on the preferred tip while below the repoll and
    /// processing bounds.
    fn issue_polls(&mut self) -> Vec<Action> {
        let params = &self.config.params;
        let mut actions = Vec::new();

        while self.polls.len() < params.concurrent_repolls
            && self.tree.processing() > 0
            && self.tree.processing() < params.optimal_processing
        {
            let Some(peers) = sampler::sample(&self.validators, params.k, &mut self.rng) else {
                warn!("validator set is empty, cannot poll");
                break;
            };

            let tip = self.tree.preference();
            let height = self
                .tree
                .get_block(&tip)
                .map(|b| b.height)
                .unwrap_or_else(|| panic!("preference {tip} not in tree"));
            let request_id = self.polls.open(tip, height, &peers, self.now);

            for peer in &peers {
                actions.push(Action::Send {
                    to: *peer,
                    message: OutboundMessage::PullQuery {
                        chain_id: self.config.chain_id,
                        request_id,
                        block_id: tip,
                        requested_height: height,
                    },
                });
            }
            actions.push(Action::SetTimer {
                id: TimerId::Request(request_id),
                duration: params.max_item_processing_time,
            });
        }

        actions
    }

    fn on_chits(
        &mut self,
        peer: NodeId,
        request_id: RequestId,
        preferred_id: BlockId,
        _preferred_id_at_height: BlockId,
        _accepted_id: BlockId,
    ) -> Vec<Action> {
        let mut actions = Vec::new();

        // A vote for a block we have never seen: fetch it so the next poll
        // can be conclusive.
        if !self.tree.contains(&preferred_id)
            && !self
                .outstanding_gets
                .values()
                .any(|wanted| *wanted == preferred_id)
        {
            actions.extend(self.fetch_block(peer, preferred_id));
        }

        self.polls.record_vote(request_id, peer, preferred_id);
        actions.extend(self.drain_and_decide());
        actions
    }

    fn fetch_block(&mut self, peer: NodeId, block_id: BlockId) -> Vec<Action> {
        let request_id = self.polls.allocate_request_id();
        self.outstanding_gets.insert(request_id, block_id);
        trace!(?peer, block = ?block_id, %request_id, "fetching voted block");
        vec![
            Action::Send {
                to: peer,
                message: OutboundMessage::Get {
                    chain_id: self.config.chain_id,
                    request_id,
                    block_id,
                },
            },
            Action::SetTimer {
                id: TimerId::Request(request_id),
                duration: self.config.params.max_item_processing_time,
            },
        ]
    }

    fn on_query_failed(&mut self, peer: NodeId, request_id: RequestId) -> Vec<Action> {
        if self.outstanding_gets.remove(&request_id).is_some() {
            return vec![Action::CancelTimer {
                id: TimerId::Request(request_id),
            }];
        }
        self.polls.record_failure(request_id, peer);
        self.drain_and_decide()
    }

    fn on_request_expired(&mut self, request_id: RequestId) -> Vec<Action> {
        if self.outstanding_gets.remove(&request_id).is_some() {
            debug!(%request_id, "block fetch timed out");
            return vec![];
        }
        if self.polls.expire(request_id) {
            debug!(%request_id, "poll timed out, missing peers count as failures");
        }
        self.drain_and_decide()
    }

    /// Drain closed polls in open order, update the tree, and sweep for
    /// finalized blocks.
    fn drain_and_decide(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();

        let finished = self.polls.drain_finished();
        if finished.is_empty() {
            return actions;
        }

        for poll in finished {
            actions.push(Action::CancelTimer {
                id: TimerId::Request(poll.request_id()),
            });
            self.tree.record_poll(poll.tally(), &self.config.params);
        }

        let outcome = self.tree.accept(&self.config.params);
        let mut parent_ts = self.last_accepted_timestamp;
        for block in &outcome.accepted {
            // The VM verified every accepted block, so a gas breach here
            // means the replica's fee config disagrees with the network:
            // a bug, not a peer error.
            if let Err(err) = self.gas.seal_block(parent_ts, block.timestamp, block.gas_used) {
                panic!(
                    "gas invariant broken accepting {} (height {}): {err}",
                    block.id, block.height.0
                );
            }
            parent_ts = block.timestamp;

            self.processing_since.remove(&block.id);
            info!(
                block = ?block.id,
                height = block.height.0,
                gas_price = self.gas.gas_price(),
                "block accepted"
            );
            actions.push(Action::PersistAccepted {
                block: block.clone(),
            });
            actions.push(Action::NotifyAccepted {
                block: block.clone(),
            });
            actions.push(Action::EmitAcceptedBlock {
                block: block.clone(),
            });
        }
        for block in &outcome.rejected {
            self.processing_since.remove(&block.id);
            actions.push(Action::NotifyRejected {
                block: block.clone(),
            });
        }

        self.last_accepted_timestamp = parent_ts;

        // Keep polling while work remains; ask the VM for a new block when
        // room opened up.
        actions.extend(self.issue_polls());
        if !outcome.accepted.is_empty() {
            actions.extend(self.maybe_build());
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Serving peers
    // ═══════════════════════════════════════════════════════════════════════════

    fn chits_for(&self, request_id: RequestId, height: BlockHeight) -> OutboundMessage {
        let preferred_id = self.tree.preference();
        OutboundMessage::Chits {
            chain_id: self.config.chain_id,
            request_id,
            preferred_id,
            preferred_id_at_height: self
                .tree
                .preference_at_height(height.0)
                .unwrap_or(preferred_id),
            accepted_id: self.tree.last_accepted().id,
        }
    }

    fn on_pull_query(
        &mut self,
        peer: NodeId,
        request_id: RequestId,
        block_id: BlockId,
        height: BlockHeight,
    ) -> Vec<Action> {
        let mut actions = vec![Action::Send {
            to: peer,
            message: self.chits_for(request_id, height),
        }];

        // Adopt blocks we are being polled about but do not know.
        if !self.tree.contains(&block_id)
            && !self
                .outstanding_gets
                .values()
                .any(|wanted| *wanted == block_id)
        {
            actions.extend(self.fetch_block(peer, block_id));
        }
        actions
    }

    fn on_push_query(
        &mut self,
        peer: NodeId,
        request_id: RequestId,
        block_bytes: Vec<u8>,
        height: BlockHeight,
    ) -> Vec<Action> {
        vec![
            Action::Send {
                to: peer,
                message: self.chits_for(request_id, height),
            },
            Action::ParseBlock {
                peer,
                request_id,
                bytes: block_bytes,
                solicited: false,
            },
        ]
    }

    fn on_put(&mut self, peer: NodeId, request_id: RequestId, block_bytes: Vec<u8>) -> Vec<Action> {
        if !self.outstanding_gets.contains_key(&request_id) {
            trace!(?peer, %request_id, "unsolicited Put dropped");
            return vec![];
        }
        vec![Action::ParseBlock {
            peer,
            request_id,
            bytes: block_bytes,
            solicited: true,
        }]
    }
}

impl SubStateMachine for ConsensusState {
    fn try_handle(&mut self, event: &Event) -> Option<Vec<Action>> {
        match event {
            Event::ChitsReceived {
                peer,
                request_id,
                preferred_id,
                preferred_id_at_height,
                accepted_id,
            } => Some(self.on_chits(
                *peer,
                *request_id,
                *preferred_id,
                *preferred_id_at_height,
                *accepted_id,
            )),
            Event::QueryFailed { peer, request_id } => {
                Some(self.on_query_failed(*peer, *request_id))
            }
            Event::RequestExpired { request_id } => Some(self.on_request_expired(*request_id)),
            Event::PullQueryReceived {
                peer,
                request_id,
                block_id,
                requested_height,
            } => Some(self.on_pull_query(*peer, *request_id, *block_id, *requested_height)),
            Event::PushQueryReceived {
                peer,
                request_id,
                block_bytes,
                requested_height,
            } => Some(self.on_push_query(
                *peer,
                *request_id,
                block_bytes.clone(),
                *requested_height,
            )),
            Event::PutReceived {
                peer,
                request_id,
                block_bytes,
            } => Some(self.on_put(*peer, *request_id, block_bytes.clone())),
            Event::GetFailedReceived { peer, request_id } => {
                Some(self.on_query_failed(*peer, *request_id))
            }
            Event::BlockParsed {
                peer,
                request_id,
                block,
                solicited,
            } => Some(self.on_block_parsed(*peer, *request_id, block.clone(), *solicited)),
            Event::BlockVerified { block, valid } => {
                Some(self.on_block_verified(block.clone(), *valid))
            }
            Event::BlockBuilt { block } => Some(self.on_block_built(block.clone())),
            Event::BlockSubmitted { block } => Some(self.on_block_submitted(block.clone())),
            Event::ValidatorSetUpdated { validators } => {
                self.set_validators(validators.clone());
                Some(vec![])
            }
            _ => None,
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }
}
