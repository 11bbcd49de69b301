//! Low-level storage engine trait and write batches.
//!
//! Defines [`StorageEngine`], the innermost storage layer. Implementations
//! hold rows per table and apply [`WriteBatch`]es atomically. Everything
//! above it (query execution, the unit of work, interception) is shared.

use tenantry_core::{Fields, TableDescriptor};
use uuid::Uuid;

use super::row::Row;

/// Storage-level failures. Any of these aborts the whole batch.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("duplicate value for unique columns {columns:?} in {table}")]
    UniqueViolation {
        table: &'static str,
        columns: &'static [&'static str],
    },
    #[error("{table} row {id} already exists")]
    DuplicateId { table: &'static str, id: Uuid },
    #[error("{table} row {id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        table: &'static str,
        id: Uuid,
        expected: u32,
        actual: u32,
    },
    #[error("{table} row {id} does not exist")]
    MissingRow { table: &'static str, id: Uuid },
    #[error("failed to decode row: {0}")]
    Decode(#[source] anyhow::Error),
}

/// A single pending write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert a new row at version 1.
    Insert {
        table: TableDescriptor,
        id: Uuid,
        fields: Fields,
    },
    /// Replace a row's fields. With `expected_version`, fails if the stored
    /// version moved since the caller read it.
    Update {
        table: TableDescriptor,
        id: Uuid,
        fields: Fields,
        expected_version: Option<u32>,
    },
    /// Physically remove a row.
    Delete {
        table: TableDescriptor,
        id: Uuid,
        expected_version: Option<u32>,
    },
}

impl WriteOp {
    #[must_use]
    pub fn table(&self) -> &TableDescriptor {
        match self {
            Self::Insert { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => {
                table
            }
        }
    }
}

/// Ordered writes applied all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Table-oriented row storage.
///
/// All operations are synchronous. Wrapped in `Arc<dyn StorageEngine>` for
/// sharing across request tasks.
pub trait StorageEngine: Send + Sync + 'static {
    /// Point-in-time snapshot of every row in `table`, ordered by id.
    fn scan(&self, table: &str) -> Vec<Row>;

    /// Retrieve a row by primary key.
    fn get(&self, table: &str, id: Uuid) -> Option<Row>;

    /// Number of rows stored in `table`, deleted or not.
    fn count(&self, table: &str) -> usize;

    /// Apply every op in `batch`, or none of them.
    ///
    /// Inserts start at version 1; each update sets version to the stored
    /// version plus one. Unique constraints declared by each op's table
    /// descriptor are checked against the final state; columns that are
    /// null never collide.
    ///
    /// # Errors
    ///
    /// Returns the first [`StorageError`] encountered; storage is unchanged.
    fn apply(&self, batch: WriteBatch, now: u64) -> Result<(), StorageError>;
}
