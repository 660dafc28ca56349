//! Exact-match next-hop table keyed by one packet field.

use crate::error::{PipelineError, Result};
use crate::packet::FieldLookup;
use crate::routing::NextHop;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Maps values of a single named field to a [`NextHop`]. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTable<V> {
    field_name: String,
    table: BTreeMap<V, NextHop>,
}

impl<V: Ord + Clone + fmt::Debug> LookupTable<V> {
    /// Build a table reading `field_name`. The first entry for a key wins; later duplicates are
    /// dropped with a warning. [`MeshConfig::validate`](crate::MeshConfig::validate) rejects them
    /// outright.
    pub fn new(
        field_name: impl Into<String>,
        entries: impl IntoIterator<Item = (V, NextHop)>,
    ) -> Self {
        let field_name = field_name.into();
        let mut table = BTreeMap::new();
        for (value, hop) in entries {
            if table.contains_key(&value) {
                warn!(field = %field_name, value = ?value, "duplicate route ignored");
                continue;
            }
            table.insert(value, hop);
        }
        Self { field_name, table }
    }

    /// Resolve the next hop for `packet`.
    ///
    /// Fails with [`PipelineError::MissingField`] when the packet lacks the configured field and
    /// with [`PipelineError::NoRoute`] when the table has no entry for its value.
    pub fn lookup<P>(&self, packet: &P) -> Result<&NextHop>
    where
        P: FieldLookup<Value = V>,
    {
        let value = packet
            .field(&self.field_name)
            .ok_or_else(|| PipelineError::MissingField {
                field: self.field_name.clone(),
            })?;
        self.table
            .get(&value)
            .ok_or_else(|| PipelineError::NoRoute {
                field: self.field_name.clone(),
                value: format!("{value:?}"),
            })
    }

    /// Values of `domain` that have no route.
    pub fn missing_routes<'a>(&self, domain: impl IntoIterator<Item = &'a V>) -> Vec<V>
    where
        V: 'a,
    {
        domain
            .into_iter()
            .filter(|value| !self.table.contains_key(*value))
            .cloned()
            .collect()
    }

    /// Whether every value of `domain` has a route.
    pub fn covers<'a>(&self, domain: impl IntoIterator<Item = &'a V>) -> bool
    where
        V: 'a,
    {
        self.missing_routes(domain).is_empty()
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&V, &NextHop)> {
        self.table.iter()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PifoPacket;
    use crate::routing::{Operation, PifoArguments};

    fn class_table() -> LookupTable<i64> {
        LookupTable::new(
            "class",
            [
                (0, NextHop::transmit()),
                (1, NextHop::enqueue([PifoArguments::calendar(1, 0)])),
            ],
        )
    }

    #[test]
    fn lookup_returns_configured_hop() {
        let table = class_table();
        let packet = PifoPacket::new().with_field("class", 1);
        let hop = table.lookup(&packet).unwrap();
        assert_eq!(hop.operation, Operation::Enqueue);
        assert_eq!(hop.pifo_arguments, vec![PifoArguments::calendar(1, 0)]);
    }

    #[test]
    fn unknown_value_is_no_route() {
        let table = class_table();
        let packet = PifoPacket::new().with_field("class", 7);
        assert_eq!(
            table.lookup(&packet),
            Err(PipelineError::NoRoute {
                field: "class".into(),
                value: "7".into()
            })
        );
    }

    #[test]
    fn absent_field_is_missing_field() {
        let table = class_table();
        let packet = PifoPacket::new().with_field("flow", 0);
        assert_eq!(
            table.lookup(&packet),
            Err(PipelineError::MissingField {
                field: "class".into()
            })
        );
    }

    #[test]
    fn coverage_reports_unrouted_values() {
        let table = class_table();
        assert!(table.covers(&[0, 1]));
        assert!(!table.covers(&[0, 1, 2]));
        assert_eq!(table.missing_routes(&[2, 0, 3]), vec![2, 3]);
    }

    #[test]
    fn first_duplicate_route_wins() {
        let table = LookupTable::new(
            "class",
            [
                (0, NextHop::transmit()),
                (0, NextHop::enqueue([PifoArguments::priority(1, 0)])),
            ],
        );
        assert_eq!(table.len(), 1);
        let packet = PifoPacket::new().with_field("class", 0);
        assert_eq!(table.lookup(&packet).unwrap(), &NextHop::transmit());
    }

    #[test]
    fn string_keys_are_supported() {
        struct Tagged(&'static str);
        impl FieldLookup for Tagged {
            type Value = String;
            fn field(&self, name: &str) -> Option<String> {
                (name == "tenant").then(|| self.0.to_string())
            }
        }

        let table = LookupTable::new("tenant", [("gold".to_string(), NextHop::transmit())]);
        assert_eq!(table.lookup(&Tagged("gold")).unwrap(), &NextHop::transmit());
        assert!(matches!(
            table.lookup(&Tagged("bronze")),
            Err(PipelineError::NoRoute { .. })
        ));
    }
}
