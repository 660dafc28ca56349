//! Per-stage operation counters.
//!
//! A stage has a single owner, so the counters are plain integers updated in place and copied out
//! as a snapshot by [`crate::stage::PipelineStage::counters`].

use serde::Serialize;
use std::fmt;

/// Counters for one stage since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounters {
    /// Successful enqueues into either bank
    pub enqueued: u64,
    /// Dequeues that returned a packet
    pub dequeued: u64,
    /// Dequeues that found nothing due
    pub empty_dequeues: u64,
    /// Operations refused with an error
    pub rejected: u64,
}

impl StageCounters {
    /// Packets currently held, as seen by the counters.
    pub fn in_flight(&self) -> u64 {
        self.enqueued.saturating_sub(self.dequeued)
    }
}

impl fmt::Display for StageCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "enq={} deq={} empty={} rejected={}",
            self.enqueued, self.dequeued, self.empty_dequeues, self.rejected
        )
    }
}
