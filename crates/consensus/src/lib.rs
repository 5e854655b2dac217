//! Snowman consensus decision machine.
//!
//! This crate provides a synchronous, sampling-based consensus
//! implementation that can be used for both simulation and production.
//!
//! # Architecture
//!
//! The decision machine processes events synchronously:
//!
//! - `Event::BlockVerified` → add the block to the preference tree, start
//!   polling
//! - `Event::ChitsReceived` / `Event::QueryFailed` → feed the open poll
//! - `Event::RequestExpired` → close the poll, counting missing peers as
//!   failures
//! - terminated polls drain **in open order** into the preference tree;
//!   finalized blocks are checked against the gas engine and emitted as
//!   accept/reject actions
//!
//! All I/O is performed by the runner via returned `Action`s.
//!
//! # Terminology
//!
//! - **Poll**: one round of querying K stake-sampled peers about the
//!   preferred tip. Conclusive when some block reaches the α thresholds.
//!
//! - **α_p / α_c**: per-poll weight needed to move a preference / to grow
//!   confidence. α_p > K/2 guarantees at most one block can clear α_p in
//!   any one poll.
//!
//! - **β_v / β_r**: consecutive successful polls required to finalize a
//!   virtuous / rogue block. A block is virtuous while it has never had a
//!   conflicting sibling.
//!
//! # Safety
//!
//! - Preference flips and confidence growth only happen through quorums in
//!   closed polls, delivered in open order.
//! - A block is accepted only when every ancestor is accepted; acceptance
//!   re-roots the tree and deterministically rejects the losing subtrees.
//!
//! # Liveness
//!
//! - Timeouts close polls with failures, so an unresponsive network
//!   degrades throughput but never safety.
//! - Backpressure: polls stop being issued above `optimal_processing`
//!   in-flight blocks or `concurrent_repolls` open polls.

mod config;
mod params;
mod poll;
mod sampler;
mod state;
mod tally;
mod tree;

pub use config::EngineConfig;
pub use params::{Parameters, ParametersError, MIN_PERCENT_CONNECTED_BUFFER};
pub use poll::{Poll, PollSet};
pub use sampler::sample;
pub use state::{ConsensusState, EngineError};
pub use tally::Tally;
pub use tree::{AcceptOutcome, PreferenceTree, TreeError};
