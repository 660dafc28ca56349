//! Pipeline stage: banks of PIFOs plus the table that routes dequeued packets.
//!
//! A stage owns a bank of priority queues, a bank of calendar queues, one lookup table and one
//! priority function. On any tick at most one enqueue and one dequeue are issued to a stage; the
//! enqueues come from ingress or from a parent stage pushing a packet down, the dequeues start at
//! the root and cascade as the lookup table directs.
//!
//! Operations on a stage:
//! 1. `enqueue` validates the queue id, computes the packet's rank once and pushes it
//! 2. `dequeue` validates the queue id and pops from the addressed queue
//! 3. `route` tells the caller where a dequeued packet goes next

use crate::config::{StageConfig, StageSpec, TickDiscipline};
use crate::error::{PipelineError, Result, StageOperation};
use crate::lookup::LookupTable;
use crate::metrics::StageCounters;
use crate::packet::FieldLookup;
use crate::priority::{Priority, PriorityFn, Tick};
use crate::queue::{CalendarQueue, PriorityQueue, QueueType};
use crate::routing::NextHop;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Last ticks seen by a stage, used by [`TickDiscipline::Strict`].
#[derive(Debug, Default, Clone, Copy)]
struct TickGuard {
    latest: Option<Tick>,
    last_enqueue: Option<Tick>,
    last_dequeue: Option<Tick>,
}

impl TickGuard {
    fn check(&self, tick: Tick, last_same_kind: Option<Tick>, kind: &str) -> Result<()> {
        if let Some(latest) = self.latest {
            if tick < latest {
                return Err(PipelineError::TickViolation {
                    tick,
                    detail: format!("{kind} after tick {latest} already happened"),
                });
            }
        }
        if last_same_kind == Some(tick) {
            return Err(PipelineError::TickViolation {
                tick,
                detail: format!("second {kind} within one tick"),
            });
        }
        Ok(())
    }

    fn advance(&mut self, tick: Tick) {
        self.latest = Some(self.latest.map_or(tick, |latest| latest.max(tick)));
    }
}

/// One node of the scheduling hierarchy.
pub struct PipelineStage<P: FieldLookup> {
    /// Bank of priority queues
    priority_queue_bank: Vec<PriorityQueue<P>>,
    /// Bank of calendar queues
    calendar_queue_bank: Vec<CalendarQueue<P>>,
    /// Table deciding where a dequeued packet goes next
    next_hop_lut: LookupTable<P::Value>,
    /// Computes an incoming packet's rank
    priority_fn: PriorityFn<P>,
    discipline: TickDiscipline,
    guard: TickGuard,
    counters: StageCounters,
}

impl<P: FieldLookup> PipelineStage<P> {
    /// Build a stage with fixed bank sizes, an immutable routing table and a priority function.
    pub fn new(
        config: StageConfig,
        routes: impl IntoIterator<Item = (P::Value, NextHop)>,
        priority_fn: PriorityFn<P>,
    ) -> Self {
        let priority_queue_bank = (0..config.num_priority_queues)
            .map(|_| PriorityQueue::new(config.priority_order))
            .collect();
        let calendar_queue_bank = (0..config.num_calendar_queues)
            .map(|_| CalendarQueue::new())
            .collect();
        Self {
            priority_queue_bank,
            calendar_queue_bank,
            next_hop_lut: LookupTable::new(config.lookup_field, routes),
            priority_fn,
            discipline: config.tick_discipline,
            guard: TickGuard::default(),
            counters: StageCounters::default(),
        }
    }

    /// Build a stage from a parsed [`StageSpec`].
    pub fn from_spec(spec: StageSpec<P::Value>, priority_fn: PriorityFn<P>) -> Self {
        let routes = spec
            .routes
            .into_iter()
            .map(|entry| (entry.value, entry.next_hop));
        Self::new(spec.config, routes, priority_fn)
    }

    /// Push `packet` into the addressed queue.
    ///
    /// For calendar queues the computed rank is the release tick. On failure the stage is left
    /// exactly as it was.
    pub fn enqueue(
        &mut self,
        queue_type: QueueType,
        queue_id: u32,
        packet: P,
        tick: Tick,
    ) -> Result<()> {
        let result = self
            .admit(queue_type, queue_id, &packet, tick)
            .and_then(|priority| self.commit(queue_type, queue_id, packet, priority, tick));
        if let Err(err) = &result {
            self.record_rejection(StageOperation::Enqueue, queue_type, queue_id, tick, err);
        }
        result
    }

    /// Run every check an enqueue would run and return the packet's rank, without touching
    /// any queue.
    pub(crate) fn admit(
        &self,
        queue_type: QueueType,
        queue_id: u32,
        packet: &P,
        tick: Tick,
    ) -> Result<Priority> {
        let index = self.check_queue_id(queue_type, queue_id)?;
        if self.discipline == TickDiscipline::Strict {
            self.guard.check(tick, self.guard.last_enqueue, "enqueue")?;
        }
        let priority = (self.priority_fn)(packet);
        if queue_type == QueueType::Calendar {
            self.calendar_queue_bank[index].check_release(priority, tick)?;
        }
        Ok(priority)
    }

    /// Push a packet that [`admit`](Self::admit) accepted with `priority`.
    pub(crate) fn commit(
        &mut self,
        queue_type: QueueType,
        queue_id: u32,
        packet: P,
        priority: Priority,
        tick: Tick,
    ) -> Result<()> {
        let index = self.check_queue_id(queue_type, queue_id)?;
        match queue_type {
            QueueType::Priority => {
                self.priority_queue_bank[index].enqueue(packet, priority, tick);
            }
            QueueType::Calendar => {
                self.calendar_queue_bank[index].enqueue(packet, priority, tick)?;
            }
        }
        self.counters.enqueued += 1;
        self.guard.last_enqueue = Some(tick);
        self.guard.advance(tick);
        debug!(%queue_type, queue_id, tick, priority, "enqueued");
        Ok(())
    }

    pub(crate) fn record_rejection(
        &mut self,
        operation: StageOperation,
        queue_type: QueueType,
        queue_id: u32,
        tick: Tick,
        err: &PipelineError,
    ) {
        self.counters.rejected += 1;
        warn!(%operation, %queue_type, queue_id, tick, error = %err, "rejected");
    }

    /// Pop from the addressed queue. `Ok(None)` means nothing was available.
    pub fn dequeue(
        &mut self,
        queue_type: QueueType,
        queue_id: u32,
        tick: Tick,
    ) -> Result<Option<P>> {
        let result = self.try_dequeue(queue_type, queue_id, tick);
        match &result {
            Ok(packet) => {
                if packet.is_some() {
                    self.counters.dequeued += 1;
                } else {
                    self.counters.empty_dequeues += 1;
                }
                self.guard.last_dequeue = Some(tick);
                self.guard.advance(tick);
            }
            Err(err) => {
                self.record_rejection(StageOperation::Dequeue, queue_type, queue_id, tick, err);
            }
        }
        result
    }

    fn try_dequeue(
        &mut self,
        queue_type: QueueType,
        queue_id: u32,
        tick: Tick,
    ) -> Result<Option<P>> {
        let index = self.check_queue_id(queue_type, queue_id)?;
        if self.discipline == TickDiscipline::Strict {
            self.guard.check(tick, self.guard.last_dequeue, "dequeue")?;
        }
        let packet = match queue_type {
            QueueType::Priority => self.priority_queue_bank[index].dequeue(tick),
            QueueType::Calendar => self.calendar_queue_bank[index].dequeue(tick)?,
        };
        debug!(%queue_type, queue_id, tick, hit = packet.is_some(), "dequeued");
        Ok(packet)
    }

    /// Next hop for a packet this stage just released.
    pub fn route(&self, packet: &P) -> Result<&NextHop> {
        self.next_hop_lut.lookup(packet)
    }

    fn check_queue_id(&self, queue_type: QueueType, queue_id: u32) -> Result<usize> {
        let bank_size = self.bank_size(queue_type);
        let index = queue_id as usize;
        if index >= bank_size {
            return Err(PipelineError::OutOfRange {
                queue_type,
                queue_id,
                bank_size,
            });
        }
        Ok(index)
    }

    pub fn bank_size(&self, queue_type: QueueType) -> usize {
        match queue_type {
            QueueType::Priority => self.priority_queue_bank.len(),
            QueueType::Calendar => self.calendar_queue_bank.len(),
        }
    }

    /// Number of packets held by the addressed queue.
    pub fn len(&self, queue_type: QueueType, queue_id: u32) -> Result<usize> {
        let index = self.check_queue_id(queue_type, queue_id)?;
        Ok(match queue_type {
            QueueType::Priority => self.priority_queue_bank[index].len(),
            QueueType::Calendar => self.calendar_queue_bank[index].len(),
        })
    }

    /// Whether every queue in both banks is empty.
    pub fn is_idle(&self) -> bool {
        self.priority_queue_bank.iter().all(PriorityQueue::is_empty)
            && self.calendar_queue_bank.iter().all(CalendarQueue::is_empty)
    }

    pub fn priority_queue(&self, queue_id: u32) -> Result<&PriorityQueue<P>> {
        let index = self.check_queue_id(QueueType::Priority, queue_id)?;
        Ok(&self.priority_queue_bank[index])
    }

    pub fn calendar_queue(&self, queue_id: u32) -> Result<&CalendarQueue<P>> {
        let index = self.check_queue_id(QueueType::Calendar, queue_id)?;
        Ok(&self.calendar_queue_bank[index])
    }

    pub fn lookup_table(&self) -> &LookupTable<P::Value> {
        &self.next_hop_lut
    }

    pub fn tick_discipline(&self) -> TickDiscipline {
        self.discipline
    }

    /// Snapshot of the stage's operation counters.
    pub fn counters(&self) -> StageCounters {
        self.counters
    }
}

impl<P> fmt::Display for PipelineStage<P>
where
    P: FieldLookup + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Contents of pipeline stage")?;
        writeln!(f, "Priority queues:")?;
        for (index, queue) in self.priority_queue_bank.iter().enumerate() {
            writeln!(f, "  index {index} {queue}")?;
        }
        writeln!(f, "Calendar queues:")?;
        for (index, queue) in self.calendar_queue_bank.iter().enumerate() {
            writeln!(f, "  index {index} {queue}")?;
        }
        write!(f, "End of contents of pipeline stage")
    }
}

/// Stage handle for callers that drive one stage from more than one thread.
pub struct SharedStage<P: FieldLookup> {
    inner: Arc<Mutex<PipelineStage<P>>>,
}

impl<P: FieldLookup> Clone for SharedStage<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: FieldLookup> SharedStage<P> {
    pub fn new(stage: PipelineStage<P>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(stage)),
        }
    }

    pub fn enqueue(
        &self,
        queue_type: QueueType,
        queue_id: u32,
        packet: P,
        tick: Tick,
    ) -> Result<()> {
        self.inner.lock().enqueue(queue_type, queue_id, packet, tick)
    }

    pub fn dequeue(&self, queue_type: QueueType, queue_id: u32, tick: Tick) -> Result<Option<P>> {
        self.inner.lock().dequeue(queue_type, queue_id, tick)
    }

    /// Route lookup; the hop is cloned so the lock is not held by the caller.
    pub fn route(&self, packet: &P) -> Result<NextHop> {
        self.inner.lock().route(packet).cloned()
    }

    pub fn counters(&self) -> StageCounters {
        self.inner.lock().counters()
    }

    /// Run `f` with exclusive access to the stage.
    pub fn with_stage<R>(&self, f: impl FnOnce(&mut PipelineStage<P>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PifoPacket;
    use crate::priority::{constant_priority, priority_fn, PriorityOrder};
    use crate::routing::{Operation, PifoArguments};

    fn rank_of(packet: &PifoPacket) -> u64 {
        packet.get("rank").unwrap_or(0).max(0) as u64
    }

    fn stage(config: StageConfig) -> PipelineStage<PifoPacket> {
        PipelineStage::new(
            config,
            [
                (0, NextHop::transmit()),
                (1, NextHop::enqueue([PifoArguments::calendar(1, 0)])),
            ],
            priority_fn(rank_of),
        )
    }

    fn packet(class: i64, rank: i64) -> PifoPacket {
        PifoPacket::new()
            .with_field("class", class)
            .with_field("rank", rank)
    }

    #[test]
    fn stage_initializes_idle() {
        let stage = stage(StageConfig::new(2, 3, "class"));
        assert!(stage.is_idle());
        assert_eq!(stage.bank_size(QueueType::Priority), 2);
        assert_eq!(stage.bank_size(QueueType::Calendar), 3);
        assert_eq!(stage.counters(), StageCounters::default());
    }

    #[test]
    fn priority_bank_serves_by_rank() {
        let mut stage = stage(StageConfig::new(1, 0, "class"));
        let slow = packet(0, 9);
        let fast = packet(0, 1);
        stage.enqueue(QueueType::Priority, 0, slow.clone(), 0).unwrap();
        stage.enqueue(QueueType::Priority, 0, fast.clone(), 1).unwrap();
        assert_eq!(stage.dequeue(QueueType::Priority, 0, 2).unwrap(), Some(fast));
        assert_eq!(stage.dequeue(QueueType::Priority, 0, 3).unwrap(), Some(slow));
        assert_eq!(stage.dequeue(QueueType::Priority, 0, 4).unwrap(), None);
    }

    #[test]
    fn priority_order_comes_from_config() {
        let config =
            StageConfig::new(1, 0, "class").with_priority_order(PriorityOrder::HighestFirst);
        let mut stage = stage(config);
        let slow = packet(0, 9);
        let fast = packet(0, 1);
        stage.enqueue(QueueType::Priority, 0, fast.clone(), 0).unwrap();
        stage.enqueue(QueueType::Priority, 0, slow.clone(), 1).unwrap();
        assert_eq!(stage.dequeue(QueueType::Priority, 0, 2).unwrap(), Some(slow));
    }

    #[test]
    fn banks_are_isolated() {
        let mut stage = stage(StageConfig::new(1, 1, "class"));
        stage.enqueue(QueueType::Priority, 0, packet(0, 0), 0).unwrap();
        assert_eq!(stage.len(QueueType::Priority, 0).unwrap(), 1);
        assert_eq!(stage.len(QueueType::Calendar, 0).unwrap(), 0);
        assert_eq!(stage.dequeue(QueueType::Calendar, 0, 1).unwrap(), None);

        stage.enqueue(QueueType::Calendar, 0, packet(0, 2), 1).unwrap();
        assert_eq!(stage.len(QueueType::Priority, 0).unwrap(), 1);
        assert_eq!(stage.len(QueueType::Calendar, 0).unwrap(), 1);
    }

    #[test]
    fn out_of_range_leaves_state_unchanged() {
        let mut stage = stage(StageConfig::new(1, 1, "class"));
        stage.enqueue(QueueType::Priority, 0, packet(0, 4), 0).unwrap();

        let err = stage
            .enqueue(QueueType::Priority, 1, packet(0, 1), 1)
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::OutOfRange {
                queue_type: QueueType::Priority,
                queue_id: 1,
                bank_size: 1
            }
        );
        assert!(matches!(
            stage.dequeue(QueueType::Calendar, 5, 1),
            Err(PipelineError::OutOfRange { bank_size: 1, .. })
        ));
        assert_eq!(stage.len(QueueType::Priority, 0).unwrap(), 1);
        assert_eq!(stage.len(QueueType::Calendar, 0).unwrap(), 0);
        assert_eq!(stage.counters().enqueued, 1);
        assert_eq!(stage.counters().rejected, 2);
    }

    #[test]
    fn priority_is_computed_once_per_enqueue() {
        use std::sync::atomic::{AtomicU64, Ordering};
        static CALLS: AtomicU64 = AtomicU64::new(0);

        let mut stage: PipelineStage<PifoPacket> = PipelineStage::new(
            StageConfig::new(1, 0, "class"),
            [(0, NextHop::transmit())],
            priority_fn(|_: &PifoPacket| {
                CALLS.fetch_add(1, Ordering::SeqCst);
                3
            }),
        );
        stage.enqueue(QueueType::Priority, 0, packet(0, 0), 0).unwrap();
        stage.dequeue(QueueType::Priority, 0, 1).unwrap();
        stage.dequeue(QueueType::Priority, 0, 2).unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn route_delegates_to_table() {
        let stage = stage(StageConfig::new(1, 1, "class"));
        assert_eq!(stage.route(&packet(0, 0)).unwrap().operation, Operation::Transmit);
        assert_eq!(stage.route(&packet(1, 0)).unwrap().operation, Operation::Enqueue);
        assert!(matches!(
            stage.route(&packet(2, 0)),
            Err(PipelineError::NoRoute { .. })
        ));
        assert!(matches!(
            stage.route(&PifoPacket::new()),
            Err(PipelineError::MissingField { .. })
        ));
    }

    #[test]
    fn stale_calendar_enqueue_is_reported() {
        let mut stage = stage(StageConfig::new(0, 1, "class"));
        assert!(matches!(
            stage.enqueue(QueueType::Calendar, 0, packet(0, 2), 5),
            Err(PipelineError::StaleSchedule { .. })
        ));
        assert!(stage.is_idle());
    }

    #[test]
    fn strict_discipline_rejects_second_enqueue_in_tick() {
        let config = StageConfig::new(1, 0, "class").with_tick_discipline(TickDiscipline::Strict);
        let mut stage = stage(config);
        stage.enqueue(QueueType::Priority, 0, packet(0, 1), 3).unwrap();
        assert!(matches!(
            stage.enqueue(QueueType::Priority, 0, packet(0, 2), 3),
            Err(PipelineError::TickViolation { tick: 3, .. })
        ));
        // One enqueue and one dequeue in the same tick is allowed.
        assert!(stage.dequeue(QueueType::Priority, 0, 3).unwrap().is_some());
        assert_eq!(stage.len(QueueType::Priority, 0).unwrap(), 0);
    }

    #[test]
    fn strict_discipline_rejects_second_dequeue_in_tick() {
        let config = StageConfig::new(1, 0, "class").with_tick_discipline(TickDiscipline::Strict);
        let mut stage = stage(config);
        stage.enqueue(QueueType::Priority, 0, packet(0, 1), 2).unwrap();
        stage.enqueue(QueueType::Priority, 0, packet(0, 2), 3).unwrap();
        assert!(stage.dequeue(QueueType::Priority, 0, 4).unwrap().is_some());
        assert!(matches!(
            stage.dequeue(QueueType::Priority, 0, 4),
            Err(PipelineError::TickViolation { tick: 4, .. })
        ));
        assert_eq!(stage.len(QueueType::Priority, 0).unwrap(), 1);
        assert_eq!(stage.counters().dequeued, 1);
        assert_eq!(stage.counters().rejected, 1);
        assert!(stage.dequeue(QueueType::Priority, 0, 5).unwrap().is_some());
    }

    #[test]
    fn admit_checks_without_enqueuing() {
        let mut stage = stage(StageConfig::new(1, 1, "class"));
        stage.dequeue(QueueType::Calendar, 0, 6).unwrap();
        assert_eq!(stage.admit(QueueType::Priority, 0, &packet(0, 9), 6), Ok(9));
        assert!(matches!(
            stage.admit(QueueType::Calendar, 0, &packet(0, 2), 6),
            Err(PipelineError::StaleSchedule { current_tick: 6, .. })
        ));
        assert!(stage.is_idle());
        assert_eq!(stage.counters().enqueued, 0);
    }

    #[test]
    fn strict_discipline_rejects_time_going_backwards() {
        let config = StageConfig::new(1, 0, "class").with_tick_discipline(TickDiscipline::Strict);
        let mut stage = stage(config);
        stage.dequeue(QueueType::Priority, 0, 7).unwrap();
        assert!(matches!(
            stage.enqueue(QueueType::Priority, 0, packet(0, 1), 6),
            Err(PipelineError::TickViolation { tick: 6, .. })
        ));
    }

    #[test]
    fn trusting_discipline_allows_repeated_calls() {
        let mut stage = stage(StageConfig::new(1, 0, "class"));
        stage.enqueue(QueueType::Priority, 0, packet(0, 1), 3).unwrap();
        stage.enqueue(QueueType::Priority, 0, packet(0, 2), 3).unwrap();
        assert_eq!(stage.len(QueueType::Priority, 0).unwrap(), 2);
    }

    #[test]
    fn display_dumps_both_banks() {
        let mut stage: PipelineStage<PifoPacket> = PipelineStage::new(
            StageConfig::new(1, 1, "class"),
            [],
            constant_priority(4),
        );
        let p = PifoPacket::new().with_field("class", 0);
        stage.enqueue(QueueType::Calendar, 0, p.clone(), 0).unwrap();
        let dump = stage.to_string();
        assert!(dump.contains("Priority queues:\n  index 0 []"));
        assert!(dump.contains(&format!("Calendar queues:\n  index 0 cursor=0 [{p}@t4]")));
    }

    #[test]
    fn shared_stage_serializes_access() {
        let shared = SharedStage::new(stage(StageConfig::new(1, 0, "class")));
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        shared
                            .enqueue(QueueType::Priority, 0, packet(0, i), worker * 25 + i as u64)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(shared.counters().enqueued, 100);
        assert_eq!(shared.with_stage(|stage| stage.len(QueueType::Priority, 0).unwrap()), 100);
        let first = shared.dequeue(QueueType::Priority, 0, 200).unwrap().unwrap();
        assert_eq!(first.get("rank"), Some(0));
        assert_eq!(shared.route(&first).unwrap(), NextHop::transmit());
    }
}
