//! Error taxonomy shared by every pipeline component.
//!
//! All failures are local and synchronous: they are returned to the immediate caller and never
//! retried or recovered internally. An empty queue is not an error; dequeue reports it as `None`.

use crate::priority::Tick;
use crate::queue::QueueType;
use std::fmt;
use thiserror::Error;

/// Stage operation a [`PipelineError::AtStage`] error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOperation {
    Enqueue,
    Dequeue,
    Route,
}

impl fmt::Display for StageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOperation::Enqueue => write!(f, "enqueue"),
            StageOperation::Dequeue => write!(f, "dequeue"),
            StageOperation::Route => write!(f, "route"),
        }
    }
}

/// Failure raised by a queue, lookup table, stage or mesh operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// `queue_id` does not address a queue in the selected bank.
    #[error("{queue_type} queue {queue_id} out of range (bank size {bank_size})")]
    OutOfRange {
        queue_type: QueueType,
        queue_id: u32,
        bank_size: usize,
    },

    /// The lookup table has no entry for the packet's field value.
    #[error("no route for {field} = {value}")]
    NoRoute { field: String, value: String },

    /// The packet does not expose the field a lookup table reads.
    #[error("packet has no field {field:?}")]
    MissingField { field: String },

    /// A calendar enqueue asked for a release tick that has already passed.
    #[error("release tick {release_tick} is earlier than current tick {current_tick}")]
    StaleSchedule {
        release_tick: Tick,
        current_tick: Tick,
    },

    /// A calendar dequeue was issued at a tick earlier than the cursor.
    #[error("dequeue at tick {tick} would move calendar cursor back from {cursor}")]
    CursorRegression { tick: Tick, cursor: Tick },

    /// Strict tick discipline detected a contract violation.
    #[error("tick {tick}: {detail}")]
    TickViolation { tick: Tick, detail: String },

    /// A routing descriptor names a stage the mesh does not own.
    #[error("unknown stage {stage_id}")]
    UnknownStage { stage_id: u32 },

    /// Construction-time configuration could not be parsed or is inconsistent.
    #[error("config error: {0}")]
    Config(String),

    /// A stage failure seen through a mesh, tagged with where and when it happened.
    #[error("stage {stage_id} {operation} at tick {tick}: {source}")]
    AtStage {
        stage_id: u32,
        operation: StageOperation,
        tick: Tick,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Tag this error with the stage and operation that produced it.
    pub fn at_stage(self, stage_id: u32, operation: StageOperation, tick: Tick) -> Self {
        PipelineError::AtStage {
            stage_id,
            operation,
            tick,
            source: Box::new(self),
        }
    }

    /// The underlying failure, with any stage context stripped.
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            PipelineError::AtStage { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
