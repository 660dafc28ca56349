//! Routing descriptors produced by lookup tables.
//!
//! These types are pure data: a stage never holds a reference to another stage. Destinations are
//! addressed by `stage_id` and resolved by whoever owns the stages (see [`crate::mesh`]).

use crate::queue::QueueType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happens to a packet after it leaves a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Enqueue,
    Dequeue,
    Transmit,
}

/// Address of a single queue in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PifoArguments {
    pub stage_id: u32,
    pub queue_type: QueueType,
    pub queue_id: u32,
}

impl PifoArguments {
    pub fn new(stage_id: u32, queue_type: QueueType, queue_id: u32) -> Self {
        Self {
            stage_id,
            queue_type,
            queue_id,
        }
    }

    pub fn priority(stage_id: u32, queue_id: u32) -> Self {
        Self::new(stage_id, QueueType::Priority, queue_id)
    }

    pub fn calendar(stage_id: u32, queue_id: u32) -> Self {
        Self::new(stage_id, QueueType::Calendar, queue_id)
    }
}

impl fmt::Display for PifoArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage {} {} queue {}",
            self.stage_id, self.queue_type, self.queue_id
        )
    }
}

/// Routing decision for a dequeued packet.
///
/// For [`Operation::Enqueue`] every entry of `pifo_arguments` receives a copy of the packet, in
/// list order. For dequeue and transmit the list is singleton or empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextHop {
    pub operation: Operation,
    #[serde(default)]
    pub pifo_arguments: Vec<PifoArguments>,
}

impl NextHop {
    /// Enqueue into every destination listed.
    pub fn enqueue(destinations: impl IntoIterator<Item = PifoArguments>) -> Self {
        Self {
            operation: Operation::Enqueue,
            pifo_arguments: destinations.into_iter().collect(),
        }
    }

    /// Pull the next packet from `source`.
    pub fn dequeue(source: PifoArguments) -> Self {
        Self {
            operation: Operation::Dequeue,
            pifo_arguments: vec![source],
        }
    }

    /// Leave the scheduling hierarchy.
    pub fn transmit() -> Self {
        Self {
            operation: Operation::Transmit,
            pifo_arguments: Vec::new(),
        }
    }
}
