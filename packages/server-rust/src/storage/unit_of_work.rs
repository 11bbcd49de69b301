//! Request-owned unit of work over a [`StorageEngine`].
//!
//! A [`UnitOfWork`] tracks the persisted state of every row it reads, queues
//! saves and deletions, and on [`commit`](UnitOfWork::commit) hands the
//! queued entities to the flush interceptors before writing them in one
//! atomic batch. Every read passes through the read interceptors first.
//!
//! The ambient [`RequestContext`](tenantry_core::RequestContext) is read from
//! [`crate::context`] at the moment of each read or commit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tenantry_core::{ClockSource, ContextOverrides, Entity, Predicate, Select};
use uuid::Uuid;

use super::engine::{StorageEngine, StorageError, WriteBatch, WriteOp};
use super::interceptor::{
    FlushInterceptor, InterceptorChain, PendingChanges, PendingEntity, ReadInterceptor, Snapshot,
    TrackedEntity,
};
use super::query;
use super::row::Row;
use crate::context;
use crate::error::TenancyError;

type RowKey = (&'static str, Uuid);

fn key_of(entity: &dyn TrackedEntity) -> RowKey {
    (entity.table().name, entity.entity_id())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Save,
    Delete,
    Purge,
}

struct Staged {
    intent: Intent,
    entity: Box<dyn TrackedEntity>,
    /// Persisted state captured when a deletion is queued.
    snapshot: Option<Snapshot>,
}

/// Counts of rows written by a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Re-saved entities that turned out to be unchanged and were skipped.
    pub unchanged: usize,
}

/// Pending changes and loaded-row snapshots for one logical request.
///
/// Not shared between requests; create one per request from
/// [`Database::unit_of_work`](super::Database::unit_of_work).
pub struct UnitOfWork {
    engine: Arc<dyn StorageEngine>,
    interceptors: InterceptorChain,
    clock: Arc<dyn ClockSource>,
    snapshots: HashMap<RowKey, Snapshot>,
    staged: Vec<Staged>,
    /// Rows whose version is bumped on commit even when unchanged.
    touched: HashSet<RowKey>,
}

impl UnitOfWork {
    pub(crate) fn new(
        engine: Arc<dyn StorageEngine>,
        interceptors: InterceptorChain,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            engine,
            interceptors,
            clock,
            snapshots: HashMap::new(),
            staged: Vec::new(),
            touched: HashSet::new(),
        }
    }

    /// Runs `select` after read interception and decodes the rows as `T`.
    ///
    /// # Errors
    ///
    /// Returns the first interceptor error (nothing is executed), or
    /// [`StorageError::Decode`] if a row does not decode as `T`.
    pub fn query<T: Entity>(&mut self, mut select: Select) -> Result<Vec<T>, TenancyError> {
        if select.table != T::TABLE {
            return Err(TenancyError::Internal(anyhow::anyhow!(
                "select on {} cannot be decoded as {}",
                select.table.name,
                T::TABLE.name
            )));
        }
        let rows = self.rows(&mut select)?;
        rows.into_iter().map(|row| self.track(row)).collect()
    }

    /// All `T` rows matching `predicate`.
    ///
    /// # Errors
    ///
    /// See [`query`](Self::query).
    pub fn find<T: Entity>(&mut self, predicate: Predicate) -> Result<Vec<T>, TenancyError> {
        self.query(Select::from::<T>().filter(predicate))
    }

    /// Every visible `T` row.
    ///
    /// # Errors
    ///
    /// See [`query`](Self::query).
    pub fn all<T: Entity>(&mut self) -> Result<Vec<T>, TenancyError> {
        self.query(Select::from::<T>())
    }

    /// First `T` row (by id) matching `predicate`.
    ///
    /// # Errors
    ///
    /// See [`query`](Self::query).
    pub fn first<T: Entity>(&mut self, predicate: Predicate) -> Result<Option<T>, TenancyError> {
        Ok(self
            .query(Select::from::<T>().filter(predicate).limit(1))?
            .into_iter()
            .next())
    }

    /// Looks up a `T` by primary key. Subject to read interception, so a row
    /// outside the current tenant or soft-deleted reads as `None`.
    ///
    /// # Errors
    ///
    /// See [`query`](Self::query).
    pub fn get<T: Entity>(&mut self, id: Uuid) -> Result<Option<T>, TenancyError> {
        self.first(Predicate::eq(tenantry_core::entity::columns::ID, id))
    }

    /// Queues `entity` for saving: an insert if it was never loaded through
    /// this unit of work, an update otherwise. Replaces any earlier queued
    /// change for the same row.
    pub fn add<T: Entity>(&mut self, entity: T) {
        self.stage(Intent::Save, Box::new(entity), None);
    }

    /// Queues `entity` for deletion. Soft-deletable entities are converted
    /// into updates by the flush interceptors; others are removed.
    ///
    /// Deleting an entity that was only queued for insert cancels the insert.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::NotFound`] if the row is not persisted or not
    /// readable under the current context.
    pub fn delete<T: Entity>(&mut self, entity: T) -> Result<(), TenancyError> {
        self.stage_removal(Intent::Delete, entity)
    }

    /// Queues `entity` for physical removal, bypassing soft delete.
    ///
    /// # Errors
    ///
    /// Same as [`delete`](Self::delete).
    pub fn hard_delete<T: Entity>(&mut self, entity: T) -> Result<(), TenancyError> {
        self.stage_removal(Intent::Purge, entity)
    }

    /// Queues a loaded `entity` for saving and forces a version bump even if
    /// nothing changed. A concurrent commit that also touches or updates the
    /// row then fails with a version conflict.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::NotFound`] if `entity` was not loaded through
    /// this unit of work.
    pub fn touch<T: Entity>(&mut self, entity: T) -> Result<(), TenancyError> {
        let key = key_of(&entity);
        if !self.snapshots.contains_key(&key) {
            return Err(TenancyError::NotFound { entity: key.0 });
        }
        self.touched.insert(key);
        self.stage(Intent::Save, Box::new(entity), None);
        Ok(())
    }

    /// Whether `entity` differs from its persisted state. Entities never
    /// loaded through this unit of work are reported as modified.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Decode`] if the entity cannot be serialized.
    pub fn is_modified<T: Entity>(&self, entity: &T) -> Result<bool, TenancyError> {
        let snapshot = self.snapshots.get(&key_of(entity)).cloned();
        Ok(PendingEntity::new(Box::new(entity.clone()), snapshot).is_modified()?)
    }

    /// Number of queued changes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.staged.len()
    }

    /// Discards every queued change. Loaded snapshots are kept.
    pub fn rollback(&mut self) {
        let discarded = self.staged.len();
        self.staged.clear();
        self.touched.clear();
        if discarded > 0 {
            tracing::debug!(discarded, "rolled back unit of work");
        }
    }

    /// Runs the flush interceptors and writes every queued change atomically.
    ///
    /// Queued changes are consumed whether or not the commit succeeds.
    ///
    /// # Errors
    ///
    /// Any interceptor or storage error aborts the commit; storage is left
    /// exactly as it was.
    pub fn commit(&mut self) -> Result<CommitSummary, TenancyError> {
        let staged = std::mem::take(&mut self.staged);
        let touched = std::mem::take(&mut self.touched);
        if staged.is_empty() {
            return Ok(CommitSummary::default());
        }

        let ctx = context::current();
        let mut changes = PendingChanges::default();
        for item in staged {
            match item.intent {
                Intent::Save => {
                    let snapshot = self.snapshots.get(&key_of(item.entity.as_ref())).cloned();
                    let pending = PendingEntity::new(item.entity, snapshot);
                    if pending.snapshot.is_some() {
                        changes.dirty.push(pending);
                    } else {
                        changes.new.push(pending);
                    }
                }
                Intent::Delete => changes
                    .deleted
                    .push(PendingEntity::new(item.entity, item.snapshot)),
                Intent::Purge => changes
                    .purged
                    .push(PendingEntity::new(item.entity, item.snapshot)),
            }
        }

        let queued = changes.len();
        if let Err(err) = self.interceptors.before_flush(&ctx, &mut changes) {
            tracing::warn!(error = %err, "flush interceptor aborted commit");
            return Err(err);
        }
        if changes.is_empty() {
            tracing::debug!(queued, "flush interceptors left nothing to write");
            return Ok(CommitSummary::default());
        }

        let (batch, written, summary) = build_batch(changes, &touched)?;
        let ops = batch.len();
        self.engine.apply(batch, self.clock.now()).inspect_err(|err| {
            tracing::warn!(error = %err, "storage rejected commit");
        })?;

        for (key, snapshot) in written {
            match snapshot {
                Some(snapshot) => {
                    self.snapshots.insert(key, snapshot);
                }
                None => {
                    self.snapshots.remove(&key);
                }
            }
        }
        tracing::debug!(
            ops,
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            "committed unit of work"
        );
        Ok(summary)
    }

    fn rows(&self, select: &mut Select) -> Result<Vec<Row>, TenancyError> {
        let ctx = context::current();
        self.interceptors.before_read(&ctx, select)?;
        Ok(query::execute(self.engine.as_ref(), select))
    }

    fn track<T: Entity>(&mut self, row: Row) -> Result<T, TenancyError> {
        let entity = T::from_fields(&row.fields).map_err(StorageError::Decode)?;
        self.snapshots.insert(
            (T::TABLE.name, row.id),
            Snapshot {
                fields: row.fields,
                version: row.metadata.version,
            },
        );
        Ok(entity)
    }

    fn stage(&mut self, intent: Intent, entity: Box<dyn TrackedEntity>, snapshot: Option<Snapshot>) {
        let key = key_of(entity.as_ref());
        self.staged.retain(|s| key_of(s.entity.as_ref()) != key);
        self.staged.push(Staged {
            intent,
            entity,
            snapshot,
        });
    }

    fn stage_removal<T: Entity>(&mut self, intent: Intent, entity: T) -> Result<(), TenancyError> {
        let key = key_of(&entity);
        let snapshot = match self.snapshots.get(&key).cloned() {
            Some(snapshot) => Some(snapshot),
            None => self.readable_snapshot::<T>(key)?,
        };

        if snapshot.is_none() {
            let queued = self.staged.len();
            self.staged.retain(|s| key_of(s.entity.as_ref()) != key);
            if self.staged.len() < queued {
                return Ok(());
            }
            return Err(TenancyError::NotFound { entity: key.0 });
        }
        self.stage(intent, Box::new(entity), snapshot);
        Ok(())
    }

    /// Loads the row through the read interceptors, with soft-deleted rows
    /// visible. Rows of other tenants read as absent.
    fn readable_snapshot<T: Entity>(&mut self, key: RowKey) -> Result<Option<Snapshot>, TenancyError> {
        let ctx = context::derive(ContextOverrides::default().include_deleted(true));
        let found = context::sync_scope(ctx, || self.get::<T>(key.1))?;
        Ok(found.and_then(|_| self.snapshots.get(&key).cloned()))
    }
}

type Written = Vec<(RowKey, Option<Snapshot>)>;

fn build_batch(
    changes: PendingChanges,
    touched: &HashSet<RowKey>,
) -> Result<(WriteBatch, Written, CommitSummary), TenancyError> {
    let mut batch = WriteBatch::new();
    let mut written = Written::new();
    let mut summary = CommitSummary::default();

    for pending in changes.new {
        let mut entity = pending.entity;
        if let Some(audit) = entity.audit_mut() {
            audit.version = 1;
        }
        let fields = entity.fields()?;
        written.push((key_of(entity.as_ref()), Some(Snapshot { fields: fields.clone(), version: 1 })));
        batch.push(WriteOp::Insert {
            table: entity.table(),
            id: entity.entity_id(),
            fields,
        });
        summary.inserted += 1;
    }

    for pending in changes.dirty {
        if !pending.is_modified()? && !touched.contains(&key_of(pending.entity.as_ref())) {
            summary.unchanged += 1;
            continue;
        }
        let mut entity = pending.entity;
        let Some(snapshot) = pending.snapshot else {
            return Err(TenancyError::Internal(anyhow::anyhow!(
                "{} row {} queued as an update without a persisted snapshot",
                entity.table().name,
                entity.entity_id()
            )));
        };
        let version = snapshot.version.saturating_add(1);
        if let Some(audit) = entity.audit_mut() {
            audit.version = version;
        }
        let fields = entity.fields()?;
        written.push((key_of(entity.as_ref()), Some(Snapshot { fields: fields.clone(), version })));
        batch.push(WriteOp::Update {
            table: entity.table(),
            id: entity.entity_id(),
            fields,
            expected_version: Some(snapshot.version),
        });
        summary.updated += 1;
    }

    for pending in changes.deleted.into_iter().chain(changes.purged) {
        let entity = pending.entity;
        written.push((key_of(entity.as_ref()), None));
        batch.push(WriteOp::Delete {
            table: entity.table(),
            id: entity.entity_id(),
            expected_version: pending.snapshot.map(|s| s.version),
        });
        summary.deleted += 1;
    }

    Ok((batch, written, summary))
}
