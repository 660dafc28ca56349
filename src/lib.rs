//! Tick-driven simulation of hierarchical PIFO packet schedulers.
//!
//! A hierarchy is a set of [`PipelineStage`]s, each holding banks of priority and calendar queues
//! and a lookup table that routes dequeued packets. [`PifoMesh`] owns the stages by id and turns
//! routing decisions into cross-stage enqueues.

pub mod config;
pub mod error;
pub mod lookup;
pub mod mesh;
pub mod metrics;
pub mod packet;
pub mod priority;
pub mod queue;
pub mod routing;
pub mod stage;

// Re-export for easier testing
pub use config::{MeshConfig, StageConfig, TickDiscipline};
pub use error::{PipelineError, Result, StageOperation};
pub use lookup::LookupTable;
pub use mesh::{Disposition, PifoMesh};
pub use packet::{FieldLookup, PifoPacket};
pub use priority::{Priority, PriorityOrder, Tick};
pub use queue::{CalendarQueue, PriorityQueue, QueueType};
pub use routing::{NextHop, Operation, PifoArguments};
pub use stage::{PipelineStage, SharedStage};
