//! Priority queue with deterministic FIFO tie-breaking.
//!
//! Elements are served by rank in the direction given by [`PriorityOrder`]. Equal ranks are served
//! by earliest enqueue tick, and elements pushed within the same tick keep their insertion order.

use crate::priority::{Priority, PriorityOrder, Tick};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

/// Element stored in the heap together with everything needed to order it.
#[derive(Debug)]
struct QueuedElement<T> {
    item: T,
    priority: Priority,
    /// Tick at which the element was enqueued (first tie-breaker)
    tick: Tick,
    /// Insertion sequence number (second tie-breaker)
    seq: u64,
    order: PriorityOrder,
}

impl<T> QueuedElement<T> {
    /// Service order: `Less` means `self` leaves the queue before `other`.
    fn service_cmp(&self, other: &Self) -> Ordering {
        self.order
            .compare(self.priority, other.priority)
            .then_with(|| self.tick.cmp(&other.tick))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl<T> Ord for QueuedElement<T> {
    /// BinaryHeap is a max-heap, so the element served first must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other.service_cmp(self)
    }
}

impl<T> PartialOrd for QueuedElement<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for QueuedElement<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for QueuedElement<T> {}

/// Unbounded PIFO serving elements by rank.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    heap: BinaryHeap<QueuedElement<T>>,
    order: PriorityOrder,
    next_seq: u64,
}

impl<T> PriorityQueue<T> {
    /// Create an empty queue serving ranks in `order`.
    pub fn new(order: PriorityOrder) -> Self {
        Self {
            heap: BinaryHeap::new(),
            order,
            next_seq: 0,
        }
    }

    /// Insert `item` with its precomputed rank. Always succeeds.
    pub fn enqueue(&mut self, item: T, priority: Priority, tick: Tick) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedElement {
            item,
            priority,
            tick,
            seq,
            order: self.order,
        });
    }

    /// Remove the element served first, or `None` when the queue is empty.
    ///
    /// The tick is accepted for interface symmetry with the calendar queue; service order does
    /// not depend on it.
    pub fn dequeue(&mut self, _tick: Tick) -> Option<T> {
        self.heap.pop().map(|element| element.item)
    }

    /// Rank of the element that would be served next.
    pub fn peek_priority(&self) -> Option<Priority> {
        self.heap.peek().map(|element| element.priority)
    }

    pub fn order(&self) -> PriorityOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Snapshot of `(item, priority, enqueue tick)` in service order.
    pub fn entries(&self) -> Vec<(&T, Priority, Tick)> {
        let mut elements: Vec<&QueuedElement<T>> = self.heap.iter().collect();
        elements.sort_by(|a, b| a.service_cmp(b));
        elements
            .into_iter()
            .map(|element| (&element.item, element.priority, element.tick))
            .collect()
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new(PriorityOrder::default())
    }
}

impl<T: fmt::Display> fmt::Display for PriorityQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (index, (item, priority, tick)) in self.entries().into_iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{item}@p{priority}/t{tick}")?;
        }
        write!(f, "]")
    }
}
