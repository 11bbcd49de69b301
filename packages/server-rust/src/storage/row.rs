//! Row types for the storage layer.
//!
//! Defines the unit stored in a [`StorageEngine`](super::StorageEngine):
//! [`Row`], made of the entity's column map and [`RowMetadata`].

use tenantry_core::entity::columns;
use tenantry_core::{Fields, Value};
use uuid::Uuid;

/// Metadata tracked for every stored row.
///
/// Storage-internal: never part of an entity's fields. The `version` drives
/// optimistic concurrency checks in [`WriteOp::Update`](super::WriteOp).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowMetadata {
    /// Row version: 1 on insert, incremented on every update.
    pub version: u32,
    /// Wall-clock millis when the row was inserted.
    pub created_at: u64,
    /// Wall-clock millis of the last write.
    pub updated_at: u64,
}

impl RowMetadata {
    /// Metadata for a freshly inserted row.
    #[must_use]
    pub fn new(now: u64) -> Self {
        Self {
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a write: increments `version` and updates `updated_at`.
    pub fn on_update(&mut self, now: u64) {
        self.version = self.version.saturating_add(1);
        self.updated_at = now;
    }
}

/// A stored row: primary key, columns, and storage metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: Uuid,
    pub fields: Fields,
    pub metadata: RowMetadata,
}

impl Row {
    /// Value of `column`, with the primary key exposed as `id`.
    ///
    /// Missing columns read as `None`; predicates treat them like null.
    #[must_use]
    pub fn column(&self, column: &str) -> Option<Value> {
        if column == columns::ID {
            return Some(Value::from(self.id));
        }
        self.fields.get(column).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_versions_start_at_one_and_increase() {
        let mut meta = RowMetadata::new(100);
        assert_eq!(meta.version, 1);
        assert_eq!(meta.created_at, 100);
        meta.on_update(200);
        assert_eq!(meta.version, 2);
        assert_eq!(meta.created_at, 100);
        assert_eq!(meta.updated_at, 200);
    }

    #[test]
    fn id_column_is_always_available() {
        let id = Uuid::new_v4();
        let row = Row {
            id,
            fields: Fields::new(),
            metadata: RowMetadata::new(0),
        };
        assert_eq!(row.column("id"), Some(Value::from(id)));
        assert_eq!(row.column("missing"), None);
    }
}
