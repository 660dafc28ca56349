//! Rank definitions and the priority functions used by every stage.
//!
//! A [`Priority`] plays two roles: priority queues order elements by it, while calendar queues
//! interpret it as the tick at which an element becomes eligible for release.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Rank computed for a packet at enqueue time.
pub type Priority = u64;

/// Discrete logical time. Supplied by the caller on every enqueue/dequeue.
pub type Tick = u64;

/// Direction in which a priority queue serves ranks.
///
/// The ordering direction is never assumed: each stage states which end of the rank space is
/// served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityOrder {
    /// Smaller ranks are served first (earliest deadline, lowest rank).
    #[default]
    LowestFirst,
    /// Larger ranks are served first.
    HighestFirst,
}

impl PriorityOrder {
    /// Compare two ranks so that the rank to be served first is `Ordering::Less`.
    pub fn compare(self, a: Priority, b: Priority) -> Ordering {
        match self {
            PriorityOrder::LowestFirst => a.cmp(&b),
            PriorityOrder::HighestFirst => b.cmp(&a),
        }
    }
}

impl fmt::Display for PriorityOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PriorityOrder::LowestFirst => "lowest_first",
            PriorityOrder::HighestFirst => "highest_first",
        };
        write!(f, "{label}")
    }
}

/// Function computing a packet's rank. Owned by a stage and invoked once per enqueue.
pub type PriorityFn<P> = Box<dyn Fn(&P) -> Priority + Send + Sync>;

/// Box a closure into a [`PriorityFn`].
pub fn priority_fn<P, F>(f: F) -> PriorityFn<P>
where
    F: Fn(&P) -> Priority + Send + Sync + 'static,
{
    Box::new(f)
}

/// Priority function that assigns the same rank to every packet.
///
/// With equal ranks a priority queue degenerates to FIFO on enqueue tick.
pub fn constant_priority<P>(rank: Priority) -> PriorityFn<P> {
    Box::new(move |_| rank)
}
