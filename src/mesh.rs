//! Arena of stages addressed by id, and the interpretation of [`NextHop`] decisions.
//!
//! Stages never reference each other. A mesh owns all of them in a `Vec` indexed by `stage_id`
//! and performs the cross-stage enqueues a routing decision asks for. It has no notion of time of
//! its own: callers choose the tick for every call.

use crate::config::{MeshConfig, TickDiscipline};
use crate::error::{PipelineError, Result, StageOperation};
use crate::metrics::StageCounters;
use crate::packet::FieldLookup;
use crate::priority::{Priority, PriorityFn, Tick};
use crate::routing::{Operation, PifoArguments};
use crate::stage::PipelineStage;
use crossbeam_channel::Sender;
use tracing::{debug, warn};

/// Outcome of applying a stage's routing decision to a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition<P> {
    /// The packet was enqueued into every listed queue.
    Enqueued(Vec<PifoArguments>),
    /// The caller should pull the next packet from this queue.
    Dequeue(PifoArguments),
    /// The packet left the hierarchy.
    Transmit(P),
}

/// A scheduling hierarchy: stages plus an optional egress channel for transmitted packets.
pub struct PifoMesh<P: FieldLookup> {
    stages: Vec<PipelineStage<P>>,
    egress: Option<Sender<P>>,
    transmitted: u64,
}

impl<P> PifoMesh<P>
where
    P: FieldLookup + Clone,
{
    /// Own `stages`; the stage at index `i` answers to `stage_id = i`.
    pub fn new(stages: Vec<PipelineStage<P>>) -> Self {
        Self {
            stages,
            egress: None,
            transmitted: 0,
        }
    }

    /// Build every stage of a validated [`MeshConfig`], asking `priority_fns` for each stage's
    /// priority function by id.
    pub fn from_config(
        config: MeshConfig<P::Value>,
        mut priority_fns: impl FnMut(u32) -> PriorityFn<P>,
    ) -> Result<Self> {
        config.validate()?;
        let stages = config
            .stages
            .into_iter()
            .enumerate()
            .map(|(stage_id, spec)| PipelineStage::from_spec(spec, priority_fns(stage_id as u32)))
            .collect();
        Ok(Self::new(stages))
    }

    /// Forward every transmitted packet on `egress` in addition to returning it.
    ///
    /// Egress is best-effort: once the receiver is gone, packets are still returned as
    /// [`Disposition::Transmit`] and counted by [`transmitted`](Self::transmitted), and the lost
    /// send is logged.
    pub fn with_egress(mut self, egress: Sender<P>) -> Self {
        self.egress = Some(egress);
        self
    }

    pub fn stage(&self, stage_id: u32) -> Result<&PipelineStage<P>> {
        self.stages
            .get(stage_id as usize)
            .ok_or(PipelineError::UnknownStage { stage_id })
    }

    pub fn stage_mut(&mut self, stage_id: u32) -> Result<&mut PipelineStage<P>> {
        self.stages
            .get_mut(stage_id as usize)
            .ok_or(PipelineError::UnknownStage { stage_id })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Enqueue into the queue named by `args`. Stage failures carry the stage id and tick.
    pub fn enqueue(&mut self, args: &PifoArguments, packet: P, tick: Tick) -> Result<()> {
        self.stage_mut(args.stage_id)?
            .enqueue(args.queue_type, args.queue_id, packet, tick)
            .map_err(|err| err.at_stage(args.stage_id, StageOperation::Enqueue, tick))
    }

    /// Dequeue from the queue named by `args`. Stage failures carry the stage id and tick.
    pub fn dequeue(&mut self, args: &PifoArguments, tick: Tick) -> Result<Option<P>> {
        self.stage_mut(args.stage_id)?
            .dequeue(args.queue_type, args.queue_id, tick)
            .map_err(|err| err.at_stage(args.stage_id, StageOperation::Dequeue, tick))
    }

    /// Route `packet`, just released by `stage_id`, and carry out the decision.
    ///
    /// Enqueue fan-out copies the packet into every destination in list order. Every destination
    /// is admitted (address, tick discipline, calendar release) before the first enqueue, so a
    /// rejected destination leaves the mesh untouched. Under [`TickDiscipline::Strict`] a stage
    /// may appear at most once in one fan-out.
    pub fn apply(&mut self, stage_id: u32, packet: P, tick: Tick) -> Result<Disposition<P>> {
        let hop = self
            .stage(stage_id)?
            .route(&packet)
            .cloned()
            .map_err(|err| err.at_stage(stage_id, StageOperation::Route, tick))?;
        match hop.operation {
            Operation::Enqueue => {
                let mut admitted = Vec::with_capacity(hop.pifo_arguments.len());
                for (position, args) in hop.pifo_arguments.iter().enumerate() {
                    let priority = self.admit(&hop.pifo_arguments[..position], args, &packet, tick)?;
                    admitted.push((*args, priority));
                }
                if let Some(((last, last_priority), rest)) = admitted.split_last() {
                    for (args, priority) in rest {
                        self.commit(args, packet.clone(), *priority, tick)?;
                    }
                    self.commit(last, packet, *last_priority, tick)?;
                }
                debug!(
                    stage_id,
                    tick,
                    copies = hop.pifo_arguments.len(),
                    "fanned out"
                );
                Ok(Disposition::Enqueued(hop.pifo_arguments))
            }
            Operation::Dequeue => {
                let source = hop.pifo_arguments.first().copied().ok_or_else(|| {
                    PipelineError::Config(format!("stage {stage_id} dequeue hop has no source"))
                })?;
                Ok(Disposition::Dequeue(source))
            }
            Operation::Transmit => {
                self.transmitted += 1;
                if let Some(egress) = &self.egress {
                    if egress.send(packet.clone()).is_err() {
                        warn!(stage_id, tick, "egress receiver dropped, packet not forwarded");
                    }
                }
                debug!(stage_id, tick, "transmitted");
                Ok(Disposition::Transmit(packet))
            }
        }
    }

    /// Check one fan-out destination; `earlier` are the destinations already admitted.
    fn admit(
        &mut self,
        earlier: &[PifoArguments],
        args: &PifoArguments,
        packet: &P,
        tick: Tick,
    ) -> Result<Priority> {
        let stage = self.stage(args.stage_id)?;
        let result = stage
            .admit(args.queue_type, args.queue_id, packet, tick)
            .and_then(|priority| {
                let repeated = earlier.iter().any(|prev| prev.stage_id == args.stage_id);
                if repeated && stage.tick_discipline() == TickDiscipline::Strict {
                    return Err(PipelineError::TickViolation {
                        tick,
                        detail: "second enqueue within one tick".into(),
                    });
                }
                Ok(priority)
            });
        result.map_err(|err| {
            if let Some(stage) = self.stages.get_mut(args.stage_id as usize) {
                stage.record_rejection(
                    StageOperation::Enqueue,
                    args.queue_type,
                    args.queue_id,
                    tick,
                    &err,
                );
            }
            err.at_stage(args.stage_id, StageOperation::Enqueue, tick)
        })
    }

    fn commit(
        &mut self,
        args: &PifoArguments,
        packet: P,
        priority: Priority,
        tick: Tick,
    ) -> Result<()> {
        self.stage_mut(args.stage_id)?
            .commit(args.queue_type, args.queue_id, packet, priority, tick)
            .map_err(|err| err.at_stage(args.stage_id, StageOperation::Enqueue, tick))
    }

    /// Dequeue from `args` and, if a packet came out, apply its routing decision.
    pub fn release(&mut self, args: &PifoArguments, tick: Tick) -> Result<Option<Disposition<P>>> {
        match self.dequeue(args, tick)? {
            Some(packet) => self.apply(args.stage_id, packet, tick).map(Some),
            None => Ok(None),
        }
    }

    /// Packets that left the hierarchy through a transmit hop.
    pub fn transmitted(&self) -> u64 {
        self.transmitted
    }

    /// Counter snapshot for every stage, by stage id.
    pub fn counters(&self) -> Vec<StageCounters> {
        self.stages.iter().map(PipelineStage::counters).collect()
    }
}
