//! Bootstrap state machine.

use crate::BootstrapConfig;
use rand_chacha::ChaCha8Rng;
use snowfall_consensus::{sample, PollSet};
use snowfall_core::{Action, Event, OutboundMessage, SubStateMachine, TimerId};
use snowfall_types::{Block, BlockId, NodeId, RequestId, Validator, ValidatorSet};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// An outstanding `GetAncestors` request.
#[derive(Debug, Clone)]
struct Fetch {
    request_id: RequestId,
    peer: NodeId,
    block_id: BlockId,
}

/// Bootstrap state machine for one chain.
///
/// # Flow
///
/// 1. **Tip round**: poll a beacon sample for their last accepted block;
///    an α-weighted agreement picks the target tip.
/// 2. **Ancestry walk**: `GetAncestors` the target, chunk by chunk, until
///    the chain connects to our local tip.
/// 3. **Execute**: accepted blocks flow to the VM parent-first.
/// 4. Repeat tip rounds until a quorum reports exactly our tip, then fire
///    `BootstrapCompleted`.
pub struct BootstrapState {
    config: BootstrapConfig,

    /// Trusted seed validators.
    beacons: ValidatorSet,

    /// Tip-selection rounds ride on the ordered poll scheduler.
    polls: PollSet,

    /// The single outstanding ancestry fetch, if any.
    fetch: Option<Fetch>,

    /// Fetched, not yet executed blocks, keyed by parent id.
    fetched_by_parent: HashMap<BlockId, Block>,

    /// The tip a beacon quorum agreed on, while we chase it.
    target: Option<BlockId>,

    /// Our local accepted tip; advances as fetched blocks execute.
    last_accepted: Block,

    /// Consecutive failures per beacon; a beacon at the limit is skipped
    /// until the next watchdog reset.
    peer_failures: HashMap<NodeId, u32>,

    /// Whether any block advanced since the last watchdog tick.
    progressed: bool,

    done: bool,

    /// Seeded per replica; beacon samples are independent across replicas.
    rng: ChaCha8Rng,

    now: Duration,
}

impl std::fmt::Debug for BootstrapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapState")
            .field("chain", &self.config.chain_id)
            .field("tip", &self.last_accepted.id)
            .field("height", &self.last_accepted.height.0)
            .field("target", &self.target)
            .field("fetched", &self.fetched_by_parent.len())
            .field("done", &self.done)
            .finish()
    }
}

impl BootstrapState {
    /// Create a bootstrapper resuming from the locally accepted tip.
    pub fn new(
        config: BootstrapConfig,
        beacons: ValidatorSet,
        last_accepted: Block,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            config,
            beacons,
            polls: PollSet::new(),
            fetch: None,
            fetched_by_parent: HashMap::new(),
            target: None,
            last_accepted,
            peer_failures: HashMap::new(),
            progressed: false,
            done: false,
            rng,
            now: Duration::ZERO,
        }
    }

    /// True once a beacon quorum confirmed our tip.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The locally accepted tip.
    pub fn last_accepted(&self) -> &Block {
        &self.last_accepted
    }

    /// Begin bootstrapping: arm the watchdog and open the first tip round.
    pub fn start(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::SetTimer {
            id: TimerId::BootstrapWatchdog,
            duration: self.config.watchdog_interval,
        }];
        actions.extend(self.start_tip_round());
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Tip selection
    // ═══════════════════════════════════════════════════════════════════════════

    /// Beacons that have not exhausted their failure budget this round.
    fn healthy_beacons(&self) -> ValidatorSet {
        ValidatorSet::new(self.beacons.iter().filter(|v: &Validator| {
            self.peer_failures
                .get(&v.node_id)
                .is_none_or(|f| *f < self.config.max_peer_failures)
        }))
    }

    fn start_tip_round(&mut self) -> Vec<Action> {
        let beacons = self.healthy_beacons();
        let Some(peers) = sample(&beacons, self.config.sample_beacons, &mut self.rng)
        else {
            warn!("no healthy beacons to poll; waiting for watchdog reset");
            return vec![];
        };

        let request_id = self.polls.open(
            self.last_accepted.id,
            self.last_accepted.height,
            &peers,
            self.now,
        );
        debug!(%request_id, beacons = peers.len(), "opening beacon tip round");

        let mut actions: Vec<Action> = peers
            .iter()
            .map(|peer| Action::Send {
                to: *peer,
                message: OutboundMessage::PullQuery {
                    chain_id: self.config.chain_id,
                    request_id,
                    block_id: self.last_accepted.id,
                    requested_height: self.last_accepted.height,
                },
            })
            .collect();
        actions.push(Action::SetTimer {
            id: TimerId::Request(request_id),
            duration: self.config.request_timeout,
        });
        actions
    }

    fn on_chits(&mut self, peer: NodeId, request_id: RequestId, accepted_id: BlockId) -> Vec<Action> {
        self.polls.record_vote(request_id, peer, accepted_id);
        self.drain_tip_rounds()
    }

    fn drain_tip_rounds(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        for poll in self.polls.drain_finished() {
            actions.push(Action::CancelTimer {
                id: TimerId::Request(poll.request_id()),
            });

            match poll.tally().quorum(self.config.alpha) {
                Some(tip) if tip == self.last_accepted.id => {
                    actions.extend(self.finish());
                    return actions;
                }
                Some(tip) => {
                    debug!(target = ?tip, "beacon quorum picked a target tip");
                    self.target = Some(tip);
                    if self.fetch.is_none() && !self.fetched_by_parent.values().any(|b| b.id == tip)
                    {
                        actions.extend(self.start_fetch(tip));
                    }
                }
                None => {
                    trace!("inconclusive tip round, resampling");
                    actions.extend(self.start_tip_round());
                }
            }
        }
        actions
    }

    fn finish(&mut self) -> Vec<Action> {
        self.done = true;
        info!(
            tip = ?self.last_accepted.id,
            height = self.last_accepted.height.0,
            "bootstrap complete"
        );
        vec![
            Action::CancelTimer {
                id: TimerId::BootstrapWatchdog,
            },
            Action::EnqueueInternal {
                event: Event::BootstrapCompleted {
                    tip_id: self.last_accepted.id,
                    tip_height: self.last_accepted.height,
                },
            },
        ]
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Ancestry fetching
    // ═══════════════════════════════════════════════════════════════════════════

    fn start_fetch(&mut self, block_id: BlockId) -> Vec<Action> {
        let beacons = self.healthy_beacons();
        let Some(peers) = sample(&beacons, 1, &mut self.rng) else {
            warn!("no healthy beacons to fetch from; waiting for watchdog reset");
            return vec![];
        };
        let peer = peers[0];
        let request_id = self.polls.allocate_request_id();
        self.fetch = Some(Fetch {
            request_id,
            peer,
            block_id,
        });
        trace!(%request_id, ?peer, block = ?block_id, "requesting ancestors");
        vec![
            Action::Send {
                to: peer,
                message: OutboundMessage::GetAncestors {
                    chain_id: self.config.chain_id,
                    request_id,
                    block_id,
                    max_containers: self.config.ancestors_max_containers,
                },
            },
            Action::SetTimer {
                id: TimerId::Request(request_id),
                duration: self.config.request_timeout,
            },
        ]
    }

    fn fetch_matches(&self, peer: NodeId, request_id: RequestId) -> bool {
        self.fetch
            .as_ref()
            .is_some_and(|f| f.request_id == request_id && f.peer == peer)
    }

    fn on_ancestors(
        &mut self,
        peer: NodeId,
        request_id: RequestId,
        containers: &[Vec<u8>],
    ) -> Vec<Action> {
        if !self.fetch_matches(peer, request_id) {
            trace!(?peer, %request_id, "dropping unsolicited ancestors");
            return vec![];
        }
        let mut actions = vec![Action::CancelTimer {
            id: TimerId::Request(request_id),
        }];

        if containers.is_empty() {
            let retry = self.fetch.take().map(|f| f.block_id);
            actions.extend(self.fetch_failed(peer, retry));
            return actions;
        }

        // Only the first ancestors_max_containers containers are considered.
        let bounded: Vec<Vec<u8>> = containers
            .iter()
            .take(self.config.ancestors_max_containers)
            .cloned()
            .collect();
        actions.push(Action::ParseAncestors {
            peer,
            request_id,
            containers: bounded,
        });
        actions
    }

    fn on_ancestors_parsed(
        &mut self,
        peer: NodeId,
        request_id: RequestId,
        blocks: Option<&[Block]>,
    ) -> Vec<Action> {
        if !self.fetch_matches(peer, request_id) {
            return vec![];
        }
        let fetch = self.fetch.take().expect("matched above");

        let Some(blocks) = blocks else {
            // A failing parse rejects the peer's whole message.
            warn!(?peer, "ancestors chunk failed to parse");
            return self.fetch_failed(peer, Some(fetch.block_id));
        };

        if !Self::chunk_is_linked(fetch.block_id, blocks) {
            warn!(?peer, "ancestors chunk does not link up, rejecting");
            return self.fetch_failed(peer, Some(fetch.block_id));
        }

        self.peer_failures.remove(&peer);
        self.progressed = true;
        for block in blocks {
            self.fetched_by_parent.insert(block.parent_id, block.clone());
        }
        let deepest = blocks.last().expect("chunk is non-empty").clone();

        let mut actions = self.execute_ready();
        if self.done {
            return actions;
        }

        if self.target == Some(self.last_accepted.id) {
            // Reached the target; confirm it still is the network tip.
            self.target = None;
            actions.extend(self.start_tip_round());
        } else if !deepest.is_genesis()
            && deepest.parent_id != self.last_accepted.id
            && !self.fetched_by_parent.contains_key(&deepest.parent_id)
        {
            // The chunk has not connected to our tip yet; keep walking.
            actions.extend(self.start_fetch(deepest.parent_id));
        }
        actions
    }

    /// Containers arrive child-first: the first must be the requested
    /// block, and each following container must be its predecessor's
    /// parent.
    fn chunk_is_linked(requested: BlockId, blocks: &[Block]) -> bool {
        let Some(first) = blocks.first() else {
            return false;
        };
        if first.id != requested {
            return false;
        }
        blocks
            .windows(2)
            .all(|pair| pair[0].parent_id == pair[1].id)
    }

    /// Execute every fetched block that now connects to the local tip,
    /// parent-first.
    fn execute_ready(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        while let Some(block) = self.fetched_by_parent.remove(&self.last_accepted.id) {
            debug!(block = ?block.id, height = block.height.0, "executing bootstrapped block");
            actions.push(Action::PersistAccepted {
                block: block.clone(),
            });
            actions.push(Action::NotifyAccepted {
                block: block.clone(),
            });
            self.progressed = true;
            self.last_accepted = block;
        }
        actions
    }

    /// Penalize a peer and retry the ancestry fetch against another one.
    fn fetch_failed(&mut self, peer: NodeId, retry: Option<BlockId>) -> Vec<Action> {
        let failures = self.peer_failures.entry(peer).or_insert(0);
        *failures += 1;
        debug!(?peer, failures = *failures, "beacon fetch failed");

        let retry_target = retry
            .or(self.target)
            .filter(|id| *id != self.last_accepted.id);
        match retry_target {
            Some(block_id) => self.start_fetch(block_id),
            None => vec![],
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Failures, timeouts, watchdog
    // ═══════════════════════════════════════════════════════════════════════════

    fn on_request_failed(&mut self, peer: Option<NodeId>, request_id: RequestId) -> Vec<Action> {
        if self
            .fetch
            .as_ref()
            .is_some_and(|f| f.request_id == request_id)
        {
            let fetch = self.fetch.take().expect("checked above");
            return self.fetch_failed(fetch.peer, Some(fetch.block_id));
        }

        match peer {
            Some(peer) => {
                self.polls.record_failure(request_id, peer);
            }
            None => {
                self.polls.expire(request_id);
            }
        }
        self.drain_tip_rounds()
    }

    fn on_watchdog(&mut self) -> Vec<Action> {
        if self.done {
            return vec![];
        }
        let mut actions = vec![Action::SetTimer {
            id: TimerId::BootstrapWatchdog,
            duration: self.config.watchdog_interval,
        }];

        if self.progressed {
            self.progressed = false;
            return actions;
        }

        // No block advanced for a whole interval: restart target selection
        // from scratch.
        warn!(tip = ?self.last_accepted.id, "bootstrap stalled, resetting");
        self.fetch = None;
        self.target = None;
        self.fetched_by_parent.clear();
        self.peer_failures.clear();
        for request_id in self.polls.open_request_ids() {
            self.polls.expire(request_id);
            actions.push(Action::CancelTimer {
                id: TimerId::Request(request_id),
            });
        }
        self.polls.drain_finished();
        actions.extend(self.start_tip_round());
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Serving peers while bootstrapping
    // ═══════════════════════════════════════════════════════════════════════════

    fn chits(&self, request_id: RequestId) -> OutboundMessage {
        OutboundMessage::Chits {
            chain_id: self.config.chain_id,
            request_id,
            preferred_id: self.last_accepted.id,
            preferred_id_at_height: self.last_accepted.id,
            accepted_id: self.last_accepted.id,
        }
    }

}

impl SubStateMachine for BootstrapState {
    fn try_handle(&mut self, event: &Event) -> Option<Vec<Action>> {
        if self.done {
            return None;
        }
        match event {
            Event::ChitsReceived {
                peer,
                request_id,
                accepted_id,
                ..
            } => Some(self.on_chits(*peer, *request_id, *accepted_id)),
            Event::QueryFailed { peer, request_id } => {
                Some(self.on_request_failed(Some(*peer), *request_id))
            }
            Event::GetFailedReceived { peer, request_id } => {
                Some(self.on_request_failed(Some(*peer), *request_id))
            }
            Event::RequestExpired { request_id } => Some(self.on_request_failed(None, *request_id)),
            Event::BootstrapWatchdog => Some(self.on_watchdog()),
            Event::AncestorsReceived {
                peer,
                request_id,
                containers,
            } => Some(self.on_ancestors(*peer, *request_id, containers)),
            Event::AncestorsParsed {
                peer,
                request_id,
                blocks,
            } => Some(self.on_ancestors_parsed(*peer, *request_id, blocks.as_deref())),

            // While bootstrapping we still answer peers with what we have.
            Event::PullQueryReceived {
                peer, request_id, ..
            }
            | Event::PushQueryReceived {
                peer, request_id, ..
            } => Some(vec![Action::Send {
                to: *peer,
                message: self.chits(*request_id),
            }]),
            _ => None,
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use snowfall_types::test_utils::{test_block, test_node, test_validator_set};
    use snowfall_types::ChainId;

    fn config() -> BootstrapConfig {
        BootstrapConfig {
            chain_id: ChainId::ZERO,
            sample_beacons: 3,
            alpha: 2,
            ancestors_max_containers: 10,
            request_timeout: Duration::from_secs(5),
            max_peer_failures: 3,
            watchdog_interval: Duration::from_secs(30),
        }
    }

    fn state() -> BootstrapState {
        BootstrapState::new(
            config(),
            test_validator_set(3),
            test_block(0, 255, 0),
            ChaCha8Rng::seed_from_u64(1),
        )
    }

    fn chits_from(peer: u8, request_id: RequestId, accepted: BlockId) -> Event {
        Event::ChitsReceived {
            peer: test_node(peer),
            request_id,
            preferred_id: accepted,
            preferred_id_at_height: accepted,
            accepted_id: accepted,
        }
    }

    fn first_query_id(actions: &[Action]) -> RequestId {
        actions
            .iter()
            .find_map(|a| match a {
                Action::Send {
                    message: OutboundMessage::PullQuery { request_id, .. },
                    ..
                } => Some(*request_id),
                _ => None,
            })
            .expect("a tip round was opened")
    }

    fn ancestors_request(actions: &[Action]) -> (NodeId, RequestId) {
        actions
            .iter()
            .find_map(|a| match a {
                Action::Send {
                    to,
                    message: OutboundMessage::GetAncestors { request_id, .. },
                } => Some((*to, *request_id)),
                _ => None,
            })
            .expect("an ancestors fetch was opened")
    }

    #[test]
    fn already_at_tip_completes_immediately() {
        let mut bs = state();
        let actions = bs.start();
        let rid = first_query_id(&actions);

        let tip = bs.last_accepted().id;
        for peer in 0..3 {
            bs.try_handle(&chits_from(peer, rid, tip)).unwrap();
        }

        assert!(bs.is_done());
    }

    #[test]
    fn walks_ancestry_then_confirms() {
        let mut bs = state();
        let actions = bs.start();
        let rid = first_query_id(&actions);

        // Beacons agree on a tip two blocks ahead of us.
        let b1 = test_block(1, 0, 1);
        let b2 = test_block(2, 1, 2);
        let mut actions = Vec::new();
        for peer in 0..3 {
            actions = bs.try_handle(&chits_from(peer, rid, b2.id)).unwrap();
        }
        let (peer, fetch_rid) = ancestors_request(&actions);

        // The chosen beacon serves the ancestry, child-first.
        let actions = bs
            .try_handle(&Event::AncestorsReceived {
                peer,
                request_id: fetch_rid,
                containers: vec![b2.bytes(), b1.bytes()],
            })
            .unwrap();
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ParseAncestors { .. })));

        let actions = bs
            .try_handle(&Event::AncestorsParsed {
                peer,
                request_id: fetch_rid,
                blocks: Some(vec![b2.clone(), b1.clone()]),
            })
            .unwrap();

        // Blocks execute parent-first.
        let accepted: Vec<BlockId> = actions
            .iter()
            .filter_map(|a| match a {
                Action::NotifyAccepted { block } => Some(block.id),
                _ => None,
            })
            .collect();
        assert_eq!(accepted, vec![b1.id, b2.id]);
        assert_eq!(bs.last_accepted().id, b2.id);
        assert!(!bs.is_done(), "completion requires a confirming tip round");

        // The confirmation round agrees we are at the tip.
        let rid = first_query_id(&actions);
        for peer in 0..3 {
            bs.try_handle(&chits_from(peer, rid, b2.id)).unwrap();
        }
        assert!(bs.is_done());
    }

    #[test]
    fn fetch_timeout_retries_with_another_request() {
        let mut bs = state();
        let actions = bs.start();
        let rid = first_query_id(&actions);

        let b1 = test_block(1, 0, 1);
        let mut actions = Vec::new();
        for peer in 0..3 {
            actions = bs.try_handle(&chits_from(peer, rid, b1.id)).unwrap();
        }
        let (_, fetch_rid) = ancestors_request(&actions);

        let actions = bs
            .try_handle(&Event::RequestExpired {
                request_id: fetch_rid,
            })
            .unwrap();
        let (_, retry_rid) = ancestors_request(&actions);
        assert_ne!(retry_rid, fetch_rid, "retry must use a fresh request id");
    }

    #[test]
    fn bad_parse_penalizes_the_peer() {
        let mut bs = state();
        let actions = bs.start();
        let rid = first_query_id(&actions);

        let b1 = test_block(1, 0, 1);
        let mut actions = Vec::new();
        for peer in 0..3 {
            actions = bs.try_handle(&chits_from(peer, rid, b1.id)).unwrap();
        }
        let (peer, fetch_rid) = ancestors_request(&actions);

        let actions = bs
            .try_handle(&Event::AncestorsParsed {
                peer,
                request_id: fetch_rid,
                blocks: None,
            })
            .unwrap();
        assert!(bs.peer_failures.get(&peer).copied().unwrap_or(0) > 0);
        // The retry goes out immediately.
        ancestors_request(&actions);
    }

    #[test]
    fn misaligned_chunk_is_rejected() {
        let mut bs = state();
        let actions = bs.start();
        let rid = first_query_id(&actions);

        let b1 = test_block(1, 0, 1);
        let unrelated = test_block(7, 6, 4);
        let mut actions = Vec::new();
        for peer in 0..3 {
            actions = bs.try_handle(&chits_from(peer, rid, b1.id)).unwrap();
        }
        let (peer, fetch_rid) = ancestors_request(&actions);

        bs.try_handle(&Event::AncestorsParsed {
            peer,
            request_id: fetch_rid,
            blocks: Some(vec![unrelated]),
        })
        .unwrap();
        assert_eq!(bs.last_accepted().id, test_block(0, 255, 0).id);
        assert!(bs.peer_failures.contains_key(&peer));
    }

    #[test]
    fn watchdog_resets_a_stalled_round() {
        let mut bs = state();
        bs.start();

        // No progress before the watchdog fires: target selection restarts.
        let actions = bs.try_handle(&Event::BootstrapWatchdog).unwrap();
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::SetTimer {
                id: TimerId::BootstrapWatchdog,
                ..
            }
        )));
        // A fresh tip round goes out.
        first_query_id(&actions);
    }

    #[test]
    fn done_state_ignores_further_events() {
        let mut bs = state();
        let actions = bs.start();
        let rid = first_query_id(&actions);
        let tip = bs.last_accepted().id;
        for peer in 0..3 {
            bs.try_handle(&chits_from(peer, rid, tip)).unwrap();
        }
        assert!(bs.is_done());
        assert!(bs.try_handle(&Event::BootstrapWatchdog).is_none());
    }
}
