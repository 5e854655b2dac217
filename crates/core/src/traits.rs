//! State machine traits.

use crate::{Action, Event};
use std::time::Duration;

/// A complete, top-level state machine for one chain.
///
/// The runner calls `set_time` with the current (simulated or real) time
/// before each `handle` call; components never read a wall clock directly.
pub trait StateMachine {
    /// Process one event, returning the actions it produced.
    ///
    /// Handlers run to completion; no two events ever interleave
    /// mid-handler.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Inject the current time.
    fn set_time(&mut self, now: Duration);

    /// The last injected time.
    fn now(&self) -> Duration;
}

/// A component state machine composed into a [`StateMachine`].
///
/// `try_handle` returns `None` for events the component does not care
/// about, letting the composition root route each event to the first
/// interested sub-machine.
pub trait SubStateMachine {
    /// Process the event if it belongs to this component.
    fn try_handle(&mut self, event: &Event) -> Option<Vec<Action>>;

    /// Inject the current time.
    fn set_time(&mut self, now: Duration);
}
