//! Chain bootstrapper.
//!
//! Before a chain can vote it must catch up to the network: the
//! bootstrapper repeatedly asks a stake-weighted sample of trusted beacons
//! for their last accepted block, walks the ancestry of the agreed tip
//! backwards with bounded `GetAncestors` requests, and executes the fetched
//! blocks parent-first. When a beacon quorum reports exactly our tip, the
//! chain is caught up and normal polling begins.
//!
//! The bootstrapper is a [`SubStateMachine`] like the decision machine: all
//! I/O happens through actions, retries and timeouts are events, and a
//! watchdog restarts target selection when no block advances for a full
//! interval.

mod config;
mod state;

pub use config::BootstrapConfig;
pub use state::BootstrapState;
