//! Calendar queue: elements are released at the tick given by their rank.
//!
//! Buckets are kept sparse in a `BTreeMap` keyed by release tick, each bucket FIFO. A cursor
//! records the latest tick the queue has been dequeued at and never moves backwards.

use crate::error::{PipelineError, Result};
use crate::priority::{Priority, Tick};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Time-indexed PIFO.
#[derive(Debug)]
pub struct CalendarQueue<T> {
    buckets: BTreeMap<Tick, VecDeque<T>>,
    cursor: Tick,
    len: usize,
}

impl<T> CalendarQueue<T> {
    pub fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            cursor: 0,
            len: 0,
        }
    }

    /// Schedule `item` for release at tick `release`.
    ///
    /// Fails with [`PipelineError::StaleSchedule`] when `release` lies before the current time,
    /// taken as the later of `tick` and the cursor. The queue is left untouched on failure.
    pub fn enqueue(&mut self, item: T, release: Priority, tick: Tick) -> Result<()> {
        self.check_release(release, tick)?;
        self.buckets.entry(release).or_default().push_back(item);
        self.len += 1;
        Ok(())
    }

    /// Whether an enqueue at `tick` with this `release` would be accepted.
    pub fn check_release(&self, release: Priority, tick: Tick) -> Result<()> {
        let now = tick.max(self.cursor);
        if release < now {
            return Err(PipelineError::StaleSchedule {
                release_tick: release,
                current_tick: now,
            });
        }
        Ok(())
    }

    /// Advance the cursor to `tick` and release the earliest due element.
    ///
    /// Returns `Ok(None)` when nothing is due. A `tick` before the cursor is rejected with
    /// [`PipelineError::CursorRegression`] and does not change any state.
    pub fn dequeue(&mut self, tick: Tick) -> Result<Option<T>> {
        if tick < self.cursor {
            return Err(PipelineError::CursorRegression {
                tick,
                cursor: self.cursor,
            });
        }
        self.cursor = tick;

        let Some(mut entry) = self.buckets.first_entry() else {
            return Ok(None);
        };
        if *entry.key() > self.cursor {
            return Ok(None);
        }
        let item = entry.get_mut().pop_front();
        if entry.get().is_empty() {
            entry.remove();
        }
        if item.is_some() {
            self.len -= 1;
        }
        Ok(item)
    }

    /// Tick the cursor currently sits at.
    pub fn cursor(&self) -> Tick {
        self.cursor
    }

    /// Earliest release tick still holding elements.
    pub fn next_release(&self) -> Option<Tick> {
        self.buckets.keys().next().copied()
    }

    /// Number of non-empty buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Snapshot of `(item, release tick)` in release order.
    pub fn entries(&self) -> Vec<(&T, Tick)> {
        self.buckets
            .iter()
            .flat_map(|(release, bucket)| bucket.iter().map(move |item| (item, *release)))
            .collect()
    }
}

impl<T> Default for CalendarQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Display> fmt::Display for CalendarQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cursor={} [", self.cursor)?;
        for (index, (item, release)) in self.entries().into_iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{item}@t{release}")?;
        }
        write!(f, "]")
    }
}
