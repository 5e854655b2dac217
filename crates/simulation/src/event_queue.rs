//! Deterministic event ordering.

use snowfall_core::EventPriority;
use std::time::Duration;

/// Total order over scheduled events.
///
/// Events fire in time order; at equal times, priority order (internal
/// before timers before network before client); at equal priorities, the
/// order they were scheduled in. The sequence number also makes every key
/// unique, so a `BTreeMap` can hold the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub time: Duration,
    pub priority: EventPriority,
    pub sequence: u64,
}
