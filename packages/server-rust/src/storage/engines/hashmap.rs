//! In-memory [`StorageEngine`] implementation backed by a locked `HashMap`.
//!
//! Suitable for development, tests, and deployments where all data fits in
//! memory. Batches are staged against a copy of each touched table and
//! swapped in only after every op and unique constraint has passed.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use tenantry_core::{TableDescriptor, Value};
use uuid::Uuid;

use crate::storage::engine::{StorageEngine, StorageError, WriteBatch, WriteOp};
use crate::storage::row::{Row, RowMetadata};

type Table = BTreeMap<Uuid, Row>;

/// In-memory storage keyed by table name, then by primary key.
///
/// A single `RwLock` guards all tables: readers proceed concurrently and a
/// batch holds the write lock for its whole duration.
#[derive(Default)]
pub struct HashMapStorage {
    tables: RwLock<HashMap<&'static str, Table>>,
}

impl HashMapStorage {
    /// Creates a new, empty `HashMapStorage`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageEngine for HashMapStorage {
    fn scan(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    fn get(&self, table: &str, id: Uuid) -> Option<Row> {
        self.tables.read().get(table)?.get(&id).cloned()
    }

    fn count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, BTreeMap::len)
    }

    fn apply(&self, batch: WriteBatch, now: u64) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tables = self.tables.write();
        let mut staged: HashMap<&'static str, (TableDescriptor, Table)> = HashMap::new();

        for op in batch.ops {
            let desc = *op.table();
            let (_, rows) = staged
                .entry(desc.name)
                .or_insert_with(|| (desc, tables.get(desc.name).cloned().unwrap_or_default()));
            apply_op(rows, op, now)?;
        }

        for (desc, rows) in staged.values() {
            check_unique(desc, rows)?;
        }

        for (name, (_, rows)) in staged {
            tables.insert(name, rows);
        }
        Ok(())
    }
}

fn check_version(
    table: &'static str,
    id: Uuid,
    row: &Row,
    expected: Option<u32>,
) -> Result<(), StorageError> {
    match expected {
        Some(expected) if expected != row.metadata.version => Err(StorageError::VersionConflict {
            table,
            id,
            expected,
            actual: row.metadata.version,
        }),
        _ => Ok(()),
    }
}

fn apply_op(rows: &mut Table, op: WriteOp, now: u64) -> Result<(), StorageError> {
    match op {
        WriteOp::Insert { table, id, fields } => {
            if rows.contains_key(&id) {
                return Err(StorageError::DuplicateId {
                    table: table.name,
                    id,
                });
            }
            rows.insert(
                id,
                Row {
                    id,
                    fields,
                    metadata: RowMetadata::new(now),
                },
            );
        }
        WriteOp::Update {
            table,
            id,
            fields,
            expected_version,
        } => {
            let row = rows.get_mut(&id).ok_or(StorageError::MissingRow {
                table: table.name,
                id,
            })?;
            check_version(table.name, id, row, expected_version)?;
            row.fields = fields;
            row.metadata.on_update(now);
        }
        WriteOp::Delete {
            table,
            id,
            expected_version,
        } => {
            let row = rows.get(&id).ok_or(StorageError::MissingRow {
                table: table.name,
                id,
            })?;
            check_version(table.name, id, row, expected_version)?;
            rows.remove(&id);
        }
    }
    Ok(())
}

/// Verifies every unique column set of `desc` against the staged rows.
/// A key containing a null or missing column never collides.
fn check_unique(desc: &TableDescriptor, rows: &Table) -> Result<(), StorageError> {
    for &columns in desc.unique {
        let mut seen = HashSet::new();
        for row in rows.values() {
            let key: Option<Vec<Value>> = columns
                .iter()
                .map(|c| row.column(c).filter(|v| !v.is_null()))
                .collect();
            let Some(key) = key else { continue };
            let encoded = serde_json::to_string(&key)
                .map_err(|e| StorageError::Decode(anyhow::Error::new(e)))?;
            if !seen.insert(encoded) {
                return Err(StorageError::UniqueViolation {
                    table: desc.name,
                    columns,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_core::Fields;

    const WIDGETS: TableDescriptor = TableDescriptor {
        name: "widgets",
        tenant_scoped: true,
        soft_delete: false,
        audited: false,
        unique: &[&["tenant_id", "code"]],
    };

    fn fields(tenant: Option<&str>, code: &str) -> Fields {
        let mut f = Fields::new();
        f.insert("tenant_id".into(), Value::from(tenant));
        f.insert("code".into(), Value::from(code));
        f
    }

    fn insert(id: Uuid, f: Fields) -> WriteOp {
        WriteOp::Insert {
            table: WIDGETS,
            id,
            fields: f,
        }
    }

    fn batch(ops: Vec<WriteOp>) -> WriteBatch {
        WriteBatch { ops }
    }

    #[test]
    fn insert_then_get_and_scan() {
        let storage = HashMapStorage::new();
        let id = Uuid::new_v4();
        storage
            .apply(batch(vec![insert(id, fields(Some("t1"), "a"))]), 10)
            .unwrap();

        let row = storage.get("widgets", id).unwrap();
        assert_eq!(row.metadata.version, 1);
        assert_eq!(row.metadata.created_at, 10);
        assert_eq!(storage.scan("widgets").len(), 1);
        assert_eq!(storage.count("widgets"), 1);
        assert!(storage.scan("unknown").is_empty());
    }

    #[test]
    fn update_bumps_version_and_checks_expected() {
        let storage = HashMapStorage::new();
        let id = Uuid::new_v4();
        storage
            .apply(batch(vec![insert(id, fields(Some("t1"), "a"))]), 0)
            .unwrap();

        let update = |expected| WriteOp::Update {
            table: WIDGETS,
            id,
            fields: fields(Some("t1"), "b"),
            expected_version: Some(expected),
        };
        storage.apply(batch(vec![update(1)]), 5).unwrap();
        let row = storage.get("widgets", id).unwrap();
        assert_eq!(row.metadata.version, 2);
        assert_eq!(row.metadata.updated_at, 5);

        let err = storage.apply(batch(vec![update(1)]), 6).unwrap_err();
        assert!(matches!(
            err,
            StorageError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn failed_batch_leaves_storage_untouched() {
        let storage = HashMapStorage::new();
        let existing = Uuid::new_v4();
        storage
            .apply(batch(vec![insert(existing, fields(Some("t1"), "a"))]), 0)
            .unwrap();

        let fresh = Uuid::new_v4();
        let err = storage
            .apply(
                batch(vec![
                    insert(fresh, fields(Some("t1"), "b")),
                    WriteOp::Delete {
                        table: WIDGETS,
                        id: Uuid::new_v4(),
                        expected_version: None,
                    },
                ]),
                1,
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingRow { .. }));
        assert!(storage.get("widgets", fresh).is_none());
        assert_eq!(storage.count("widgets"), 1);
    }

    #[test]
    fn unique_constraint_is_scoped_and_ignores_nulls() {
        let storage = HashMapStorage::new();
        storage
            .apply(
                batch(vec![
                    insert(Uuid::new_v4(), fields(Some("t1"), "a")),
                    insert(Uuid::new_v4(), fields(Some("t2"), "a")),
                    insert(Uuid::new_v4(), fields(None, "a")),
                    insert(Uuid::new_v4(), fields(None, "a")),
                ]),
                0,
            )
            .unwrap();

        let err = storage
            .apply(batch(vec![insert(Uuid::new_v4(), fields(Some("t1"), "a"))]), 1)
            .unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation { table: "widgets", .. }));
        assert_eq!(storage.count("widgets"), 4);
    }

    #[test]
    fn unique_check_sees_final_state_of_batch() {
        let storage = HashMapStorage::new();
        let old = Uuid::new_v4();
        storage
            .apply(batch(vec![insert(old, fields(Some("t1"), "a"))]), 0)
            .unwrap();

        // Freeing the key and reusing it in the same batch is allowed.
        storage
            .apply(
                batch(vec![
                    WriteOp::Delete {
                        table: WIDGETS,
                        id: old,
                        expected_version: Some(1),
                    },
                    insert(Uuid::new_v4(), fields(Some("t1"), "a")),
                ]),
                1,
            )
            .unwrap();
        assert!(storage.get("widgets", old).is_none());
        assert_eq!(storage.count("widgets"), 1);
    }

    #[test]
    fn duplicate_primary_key_is_rejected() {
        let storage = HashMapStorage::new();
        let id = Uuid::new_v4();
        storage
            .apply(batch(vec![insert(id, fields(Some("t1"), "a"))]), 0)
            .unwrap();
        let err = storage
            .apply(batch(vec![insert(id, fields(Some("t1"), "b"))]), 1)
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId { .. }));
    }
}
