//! Packet representation and the field-lookup capability the pipeline relies on.
//!
//! The scheduling core never inspects packets beyond [`FieldLookup::field`]: lookup tables read a
//! single named field, and priority functions are free to read whatever they like.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static PACKET_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Capability to read a named field and obtain a comparable value.
pub trait FieldLookup {
    /// Value type yielded by a field read. Used as the key type of lookup tables.
    type Value: Ord + Clone + fmt::Debug;

    /// Read `name`, or `None` when the packet does not carry that field.
    fn field(&self, name: &str) -> Option<Self::Value>;
}

/// Packet made of named integer fields.
///
/// Each [`PifoPacket`] receives a process-wide unique `id` at construction so tests and drivers can
/// follow a packet (and its fan-out copies) through the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PifoPacket {
    pub id: u64,
    fields: BTreeMap<String, i64>,
}

impl PifoPacket {
    /// Create a packet without fields.
    pub fn new() -> PifoPacket {
        PifoPacket {
            id: PACKET_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field assignment.
    pub fn with_field(mut self, name: impl Into<String>, value: i64) -> PifoPacket {
        self.fields.insert(name.into(), value);
        self
    }

    /// Read a field directly.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.fields.get(name).copied()
    }

    /// Iterate over `(name, value)` pairs in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, i64)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

impl Default for PifoPacket {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldLookup for PifoPacket {
    type Value = i64;

    fn field(&self, name: &str) -> Option<i64> {
        self.get(name)
    }
}

impl fmt::Display for PifoPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}(", self.id)?;
        for (index, (name, value)) in self.fields().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, ")")
    }
}
