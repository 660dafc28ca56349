//! Queue disciplines held in a stage's banks.
//!
//! The two disciplines are concrete types selected through the closed [`QueueType`] variant;
//! there is no common queue trait object, so each discipline keeps its own invariants.

pub mod calendar_queue;
pub mod priority_queue;

pub use calendar_queue::CalendarQueue;
pub use priority_queue::PriorityQueue;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Selects the bank an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    Priority,
    Calendar,
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueueType::Priority => "priority",
            QueueType::Calendar => "calendar",
        };
        write!(f, "{label}")
    }
}
