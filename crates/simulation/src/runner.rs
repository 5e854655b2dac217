//! Deterministic simulation runner.
//!
//! Each node has its own VM and storage. When a node emits delegated work
//! (`ParseBlock`, `VerifyBlock`, `BuildBlock`, ...), the runner calls that
//! node's VM inline and feeds the callback event back at the same
//! timestamp, so delegation costs nothing in simulated time but ordering is
//! exactly the production ordering.

use crate::event_queue::EventKey;
use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::NodeIndex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use snowfall_consensus::Parameters;
use snowfall_core::{Action, Event, OutboundMessage, StateMachine, TimerId};
use snowfall_gas::{Dimensions, FeeConfig};
use snowfall_node::{ChainConfig, ChainStateMachine};
use snowfall_types::{
    Block, BlockHeight, BlockId, ChainId, NodeId, RequestId, Validator, ValidatorSet,
};
use snowfall_vm::{ChainVm, MemoryVm};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{info, trace};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub network: NetworkConfig,
    pub params: Parameters,
    pub fee: FeeConfig,
    /// The node whose VM proposes blocks.
    pub proposer: NodeIndex,
}

impl SimulationConfig {
    /// A configuration sized for `num_nodes` validators with short
    /// timeouts, so tests run in small simulated horizons.
    pub fn for_nodes(num_nodes: u32) -> Self {
        let n = num_nodes as usize;
        Self {
            network: NetworkConfig {
                num_nodes,
                ..NetworkConfig::default()
            },
            params: Parameters {
                k: n,
                alpha_preference: (n / 2 + 1) as u64,
                alpha_confidence: (n / 2 + 1) as u64,
                beta_virtuous: 2,
                beta_rogue: 3,
                concurrent_repolls: 2,
                optimal_processing: 4,
                max_outstanding_items: 256,
                max_item_processing_time: Duration::from_secs(1),
            },
            fee: FeeConfig {
                min_gas_price: 1,
                weights: Dimensions([1, 1, 1, 1]),
                max_gas_per_second: 1_000_000,
                leak_gas_coeff: 10,
                update_denominator: 1_000,
                gas_target_rate: 1_000,
            },
            proposer: 0,
        }
    }
}

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Events processed by priority.
    pub events_by_priority: [u64; 4],
    /// Total actions generated.
    pub actions_generated: u64,
    /// Messages scheduled for delivery.
    pub messages_sent: u64,
    /// Messages dropped by partition or packet loss.
    pub messages_dropped: u64,
    /// Timers set.
    pub timers_set: u64,
    /// Timers cancelled.
    pub timers_cancelled: u64,
    /// Blocks accepted across all nodes.
    pub blocks_accepted: u64,
}

/// A queued occurrence: either a state machine event, or a storage request
/// the runner serves without involving the state machine.
#[derive(Debug, Clone)]
enum QueueEntry {
    Node(Event),
    /// Serve a peer's `Get` from this node's VM.
    ServeGet {
        requester: NodeIndex,
        request_id: RequestId,
        block_id: BlockId,
    },
    /// Serve a peer's `GetAncestors` from this node's VM.
    ServeAncestors {
        requester: NodeIndex,
        request_id: RequestId,
        block_id: BlockId,
        max_containers: usize,
    },
}

impl QueueEntry {
    fn priority(&self) -> snowfall_core::EventPriority {
        match self {
            QueueEntry::Node(event) => event.priority(),
            QueueEntry::ServeGet { .. } | QueueEntry::ServeAncestors { .. } => {
                snowfall_core::EventPriority::Network
            }
        }
    }
}

/// Deterministic simulation runner.
///
/// Processes events in deterministic order and executes actions. Given the
/// same seed, produces identical results every run.
pub struct SimulationRunner {
    nodes: Vec<ChainStateMachine>,
    vms: Vec<MemoryVm>,

    /// Persisted accepted blocks per node, in accept order.
    storage: Vec<Vec<Block>>,

    /// Global event queue, ordered deterministically.
    queue: BTreeMap<EventKey, (NodeIndex, QueueEntry)>,
    sequence: u64,
    now: Duration,

    network: SimulatedNetwork,

    /// RNG for network conditions (seeded for determinism).
    rng: ChaCha8Rng,

    /// Timer registry for cancellation support.
    timers: HashMap<(NodeIndex, TimerId), EventKey>,

    stats: SimulationStats,
}

/// Simulation peer ids embed the node index in the first four bytes.
fn node_id_for(index: NodeIndex) -> NodeId {
    let mut bytes = [0u8; 20];
    bytes[..4].copy_from_slice(&index.to_le_bytes());
    NodeId(bytes)
}

fn index_of(node_id: &NodeId) -> NodeIndex {
    u32::from_le_bytes(node_id.as_bytes()[..4].try_into().expect("4 bytes"))
}

/// The shared genesis block every simulated chain starts from.
pub fn genesis_block() -> Block {
    Block {
        id: BlockId::ZERO,
        parent_id: BlockId([0xff; 32]),
        height: BlockHeight(0),
        timestamp: 0,
        gas_used: 0,
        payload: Vec::new(),
    }
}

impl SimulationRunner {
    /// Create a simulation with `config.network.num_nodes` fresh nodes.
    pub fn new(config: SimulationConfig, seed: u64) -> Self {
        let num_nodes = config.network.num_nodes;
        let genesis = genesis_block();

        let validators = ValidatorSet::new((0..num_nodes).map(|i| Validator {
            node_id: node_id_for(i),
            weight: 1,
        }));

        let nodes: Vec<ChainStateMachine> = (0..num_nodes)
            .map(|i| {
                ChainStateMachine::new(
                    ChainConfig {
                        chain_id: ChainId::ZERO,
                        params: config.params,
                        fee: config.fee,
                    },
                    validators.clone(),
                    validators.clone(),
                    genesis.clone(),
                    seed.wrapping_add(i as u64).wrapping_mul(0x517cc1b727220a95),
                )
                .expect("simulation parameters are valid")
            })
            .collect();

        let vms: Vec<MemoryVm> = (0..num_nodes)
            .map(|i| MemoryVm::new(genesis.clone()).with_proposer(i == config.proposer))
            .collect();
        let storage = vec![Vec::new(); num_nodes as usize];

        info!(num_nodes, seed, "created simulation runner");
        Self {
            nodes,
            vms,
            storage,
            queue: BTreeMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            network: SimulatedNetwork::new(config.network),
            rng: ChaCha8Rng::seed_from_u64(seed),
            timers: HashMap::new(),
            stats: SimulationStats::default(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn node(&self, index: NodeIndex) -> Option<&ChainStateMachine> {
        self.nodes.get(index as usize)
    }

    pub fn vm(&self, index: NodeIndex) -> Option<&MemoryVm> {
        self.vms.get(index as usize)
    }

    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    /// The accepted chain a node has persisted, in accept order.
    pub fn accepted_chain(&self, index: NodeIndex) -> Vec<BlockId> {
        self.storage[index as usize].iter().map(|b| b.id).collect()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Driving
    // ═══════════════════════════════════════════════════════════════════════

    /// Start every node (bootstrap begins).
    pub fn start(&mut self) {
        for index in 0..self.nodes.len() as NodeIndex {
            let node = &mut self.nodes[index as usize];
            node.set_time(self.now);
            let actions = node.start();
            self.execute(index, actions);
        }
    }

    /// Schedule an external event for a node.
    pub fn schedule_event(&mut self, index: NodeIndex, at: Duration, event: Event) {
        self.push(at, index, QueueEntry::Node(event));
    }

    /// Run the simulation until simulated time `until`.
    pub fn run_until(&mut self, until: Duration) {
        while self.queue.keys().next().is_some_and(|k| k.time <= until) {
            let (key, (index, entry)) = self.queue.pop_first().expect("checked non-empty");
            self.now = self.now.max(key.time);

            match entry {
                QueueEntry::Node(event) => {
                    self.stats.events_processed += 1;
                    self.stats.events_by_priority[event.priority() as usize] += 1;

                    // A fired timer leaves the registry.
                    match &event {
                        Event::RequestExpired { request_id } => {
                            self.timers.remove(&(index, TimerId::Request(*request_id)));
                        }
                        Event::BootstrapWatchdog => {
                            self.timers.remove(&(index, TimerId::BootstrapWatchdog));
                        }
                        _ => {}
                    }

                    let node = &mut self.nodes[index as usize];
                    node.set_time(self.now);
                    trace!(node = index, event = event.type_name(), "dispatching");
                    let actions = node.handle(event);
                    self.execute(index, actions);
                }
                QueueEntry::ServeGet {
                    requester,
                    request_id,
                    block_id,
                } => {
                    let reply = match self.vms[index as usize].get_block(&block_id) {
                        Ok(block) => Event::PutReceived {
                            peer: node_id_for(index),
                            request_id,
                            block_bytes: block.bytes(),
                        },
                        Err(_) => Event::GetFailedReceived {
                            peer: node_id_for(index),
                            request_id,
                        },
                    };
                    self.deliver(index, requester, reply);
                }
                QueueEntry::ServeAncestors {
                    requester,
                    request_id,
                    block_id,
                    max_containers,
                } => {
                    let containers = self.collect_ancestors(index, block_id, max_containers);
                    let reply = if containers.is_empty() {
                        Event::GetFailedReceived {
                            peer: node_id_for(index),
                            request_id,
                        }
                    } else {
                        Event::AncestorsReceived {
                            peer: node_id_for(index),
                            request_id,
                            containers,
                        }
                    };
                    self.deliver(index, requester, reply);
                }
            }
        }
        self.now = self.now.max(until);
    }

    /// Child-first ancestry from a node's VM, bounded by the request and a
    /// hard server-side cap.
    fn collect_ancestors(
        &self,
        index: NodeIndex,
        block_id: BlockId,
        max_containers: usize,
    ) -> Vec<Vec<u8>> {
        let vm = &self.vms[index as usize];
        let limit = max_containers.min(2048);
        let mut containers = Vec::new();
        let mut cursor = block_id;
        while containers.len() < limit {
            match vm.get_block(&cursor) {
                Ok(block) => {
                    containers.push(block.bytes());
                    if block.is_genesis() {
                        break;
                    }
                    cursor = block.parent_id;
                }
                Err(_) => break,
            }
        }
        containers
    }

    fn push(&mut self, at: Duration, index: NodeIndex, entry: QueueEntry) -> EventKey {
        let key = EventKey {
            time: at,
            priority: entry.priority(),
            sequence: self.sequence,
        };
        self.sequence += 1;
        self.queue.insert(key, (index, entry));
        key
    }

    /// Route an event from one node to another through the network model.
    fn deliver(&mut self, from: NodeIndex, to: NodeIndex, event: Event) {
        match self.network.should_deliver(from, to, &mut self.rng) {
            Some(latency) => {
                self.stats.messages_sent += 1;
                self.push(self.now + latency, to, QueueEntry::Node(event));
            }
            None => {
                self.stats.messages_dropped += 1;
                trace!(from, to, "message dropped");
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Action execution
    // ═══════════════════════════════════════════════════════════════════════

    fn execute(&mut self, index: NodeIndex, actions: Vec<Action>) {
        self.stats.actions_generated += actions.len() as u64;
        for action in actions {
            self.execute_one(index, action);
        }
    }

    fn execute_one(&mut self, index: NodeIndex, action: Action) {
        match action {
            Action::Send { to, message } => self.send(index, to, message),

            Action::SetTimer { id, duration } => {
                self.stats.timers_set += 1;
                if let Some(old) = self.timers.remove(&(index, id)) {
                    self.queue.remove(&old);
                }
                let event = match id {
                    TimerId::Request(request_id) => Event::RequestExpired { request_id },
                    TimerId::BootstrapWatchdog => Event::BootstrapWatchdog,
                };
                let key = self.push(self.now + duration, index, QueueEntry::Node(event));
                self.timers.insert((index, id), key);
            }

            Action::CancelTimer { id } => {
                if let Some(key) = self.timers.remove(&(index, id)) {
                    self.stats.timers_cancelled += 1;
                    self.queue.remove(&key);
                }
            }

            Action::EnqueueInternal { event } => {
                self.push(self.now, index, QueueEntry::Node(event));
            }

            // Delegated VM work runs inline, results come back as internal
            // events at the same timestamp.
            Action::ParseBlock {
                peer,
                request_id,
                bytes,
                solicited,
            } => {
                let block = self.vms[index as usize].parse_block(&bytes).ok();
                self.push(
                    self.now,
                    index,
                    QueueEntry::Node(Event::BlockParsed {
                        peer,
                        request_id,
                        block,
                        solicited,
                    }),
                );
            }

            Action::ParseAncestors {
                peer,
                request_id,
                containers,
            } => {
                let vm = &self.vms[index as usize];
                let blocks: Option<Vec<Block>> = containers
                    .iter()
                    .map(|bytes| vm.parse_block(bytes).ok())
                    .collect();
                self.push(
                    self.now,
                    index,
                    QueueEntry::Node(Event::AncestorsParsed {
                        peer,
                        request_id,
                        blocks,
                    }),
                );
            }

            Action::VerifyBlock { block } => {
                let vm = &mut self.vms[index as usize];
                vm.set_time(self.now.as_secs());
                let valid = vm.verify(&block).is_ok();
                self.push(
                    self.now,
                    index,
                    QueueEntry::Node(Event::BlockVerified { block, valid }),
                );
            }

            Action::BuildBlock => {
                let vm = &mut self.vms[index as usize];
                vm.set_time(self.now.as_secs());
                let block = vm.build_block();
                self.push(self.now, index, QueueEntry::Node(Event::BlockBuilt { block }));
            }

            Action::NotifyAccepted { block } => {
                self.stats.blocks_accepted += 1;
                self.vms[index as usize].accept(&block);
            }

            Action::NotifyRejected { block } => {
                self.vms[index as usize].reject(&block);
            }

            Action::PersistAccepted { block } => {
                self.storage[index as usize].push(block);
            }

            Action::EmitAcceptedBlock { .. } => {}
        }
    }

    fn send(&mut self, from: NodeIndex, to: NodeId, message: OutboundMessage) {
        let to = index_of(&to);
        if to as usize >= self.nodes.len() {
            return;
        }
        let from_id = node_id_for(from);

        let entry = match message {
            OutboundMessage::PullQuery {
                request_id,
                block_id,
                requested_height,
                ..
            } => QueueEntry::Node(Event::PullQueryReceived {
                peer: from_id,
                request_id,
                block_id,
                requested_height,
            }),
            OutboundMessage::PushQuery {
                request_id,
                block_bytes,
                requested_height,
                ..
            } => QueueEntry::Node(Event::PushQueryReceived {
                peer: from_id,
                request_id,
                block_bytes,
                requested_height,
            }),
            OutboundMessage::Chits {
                request_id,
                preferred_id,
                preferred_id_at_height,
                accepted_id,
                ..
            } => QueueEntry::Node(Event::ChitsReceived {
                peer: from_id,
                request_id,
                preferred_id,
                preferred_id_at_height,
                accepted_id,
            }),
            OutboundMessage::Put {
                request_id,
                block_bytes,
                ..
            } => QueueEntry::Node(Event::PutReceived {
                peer: from_id,
                request_id,
                block_bytes,
            }),
            OutboundMessage::GetFailed { request_id, .. } => {
                QueueEntry::Node(Event::GetFailedReceived {
                    peer: from_id,
                    request_id,
                })
            }
            OutboundMessage::Ancestors {
                request_id,
                containers,
                ..
            } => QueueEntry::Node(Event::AncestorsReceived {
                peer: from_id,
                request_id,
                containers,
            }),

            // Storage requests are served runner-side at the recipient.
            OutboundMessage::Get {
                request_id,
                block_id,
                ..
            } => QueueEntry::ServeGet {
                requester: from,
                request_id,
                block_id,
            },
            OutboundMessage::GetAncestors {
                request_id,
                block_id,
                max_containers,
                ..
            } => QueueEntry::ServeAncestors {
                requester: from,
                request_id,
                block_id,
                max_containers,
            },
        };

        match self.network.should_deliver(from, to, &mut self.rng) {
            Some(latency) => {
                self.stats.messages_sent += 1;
                self.push(self.now + latency, to, entry);
            }
            None => {
                self.stats.messages_dropped += 1;
                trace!(from, to, "message dropped");
            }
        }
    }
}
