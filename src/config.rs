//! Construction-time configuration for stages and meshes.
//!
//! Everything here is literal data: bank sizes, the lookup field, routing entries and ordering
//! policy. Priority functions are code and are supplied separately when a stage is built.

use crate::error::{PipelineError, Result};
use crate::priority::PriorityOrder;
use crate::queue::QueueType;
use crate::routing::NextHop;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// How strictly a stage checks the one-enqueue/one-dequeue-per-tick contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickDiscipline {
    /// Rely on the caller; nothing is checked.
    #[default]
    Trusting,
    /// Reject ticks that go backwards and repeated operations within one tick.
    Strict,
}

/// Shape of a single stage. Fixed for the stage's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub num_priority_queues: u32,
    pub num_calendar_queues: u32,
    /// Packet field read by the stage's lookup table.
    pub lookup_field: String,
    #[serde(default)]
    pub priority_order: PriorityOrder,
    #[serde(default)]
    pub tick_discipline: TickDiscipline,
}

impl StageConfig {
    pub fn new(
        num_priority_queues: u32,
        num_calendar_queues: u32,
        lookup_field: impl Into<String>,
    ) -> Self {
        Self {
            num_priority_queues,
            num_calendar_queues,
            lookup_field: lookup_field.into(),
            priority_order: PriorityOrder::default(),
            tick_discipline: TickDiscipline::default(),
        }
    }

    pub fn with_priority_order(mut self, order: PriorityOrder) -> Self {
        self.priority_order = order;
        self
    }

    pub fn with_tick_discipline(mut self, discipline: TickDiscipline) -> Self {
        self.tick_discipline = discipline;
        self
    }

    /// Size of the bank selected by `queue_type`.
    pub fn bank_size(&self, queue_type: QueueType) -> u32 {
        match queue_type {
            QueueType::Priority => self.num_priority_queues,
            QueueType::Calendar => self.num_calendar_queues,
        }
    }
}

/// One lookup-table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry<V> {
    pub value: V,
    pub next_hop: NextHop,
}

/// Configuration and routing table of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "V: Deserialize<'de>"))]
pub struct StageSpec<V> {
    #[serde(flatten)]
    pub config: StageConfig,
    #[serde(default)]
    pub routes: Vec<RouteEntry<V>>,
}

/// A whole hierarchy, as emitted by a hierarchy compiler. Stage ids are list indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshConfig<V> {
    pub stages: Vec<StageSpec<V>>,
}

impl<V: DeserializeOwned + Ord + fmt::Debug> MeshConfig<V> {
    /// Parse and validate a JSON mesh description.
    pub fn from_json(input: &str) -> Result<Self> {
        let config: MeshConfig<V> = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }
}

impl<V: Ord + fmt::Debug> MeshConfig<V> {
    /// Check that every routing destination names an existing stage and queue, and that no
    /// stage lists the same field value twice.
    pub fn validate(&self) -> Result<()> {
        for (stage_id, spec) in self.stages.iter().enumerate() {
            let mut seen = BTreeSet::new();
            for route in &spec.routes {
                if !seen.insert(&route.value) {
                    return Err(PipelineError::Config(format!(
                        "stage {stage_id} routes {} = {:?} twice",
                        spec.config.lookup_field, route.value
                    )));
                }
                for args in &route.next_hop.pifo_arguments {
                    let target = self.stages.get(args.stage_id as usize).ok_or_else(|| {
                        PipelineError::Config(format!(
                            "stage {stage_id} routes to unknown stage {}",
                            args.stage_id
                        ))
                    })?;
                    if args.queue_id >= target.config.bank_size(args.queue_type) {
                        return Err(PipelineError::Config(format!(
                            "stage {stage_id} routes to missing {args}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
