//! Deterministic simulation of a Snowfall network.
//!
//! Each node is a full [`snowfall_node::ChainStateMachine`] with its own
//! [`snowfall_vm::MemoryVm`]. The runner executes actions (message routing,
//! timers, VM delegation, persistence) inline and in a globally
//! deterministic order: the event queue is keyed by
//! `(time, priority, sequence)`, and all randomness flows from one seed.
//! Given the same seed, a simulation produces identical results every run.

mod event_queue;
mod network;
mod runner;

pub use network::{NetworkConfig, SimulatedNetwork};
pub use runner::{SimulationConfig, SimulationRunner, SimulationStats};

/// Index type for simulation-only node routing.
pub type NodeIndex = u32;
