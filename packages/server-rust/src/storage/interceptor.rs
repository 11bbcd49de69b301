//! Interception points of the unit of work.
//!
//! Defines the two fixed extension points the data-mapping layer calls:
//! [`ReadInterceptor::before_read`] just before a [`Select`] is executed,
//! and [`FlushInterceptor::before_flush`] just before a commit is turned
//! into a write batch. [`InterceptorChain`] fans each call out to every
//! registered interceptor in registration order and stops at the first
//! error.
//!
//! Interceptors see pending entities only through [`TrackedEntity`], i.e.
//! through their capability structs, never as concrete types.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tenantry_core::entity::columns;
use tenantry_core::{Capabilities, Entity, Fields, RequestContext, Select, TableDescriptor};
use uuid::Uuid;

use super::engine::StorageError;
use crate::error::TenancyError;

/// Type-erased view of an [`Entity`] held by a unit of work.
pub trait TrackedEntity: Capabilities + Send + Sync {
    fn table(&self) -> TableDescriptor;

    fn entity_id(&self) -> Uuid;

    /// Current column values.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Decode`] if the entity cannot be serialized.
    fn fields(&self) -> Result<Fields, StorageError>;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Entity> TrackedEntity for T {
    fn table(&self) -> TableDescriptor {
        T::TABLE
    }

    fn entity_id(&self) -> Uuid {
        self.id()
    }

    fn fields(&self) -> Result<Fields, StorageError> {
        self.to_fields().map_err(StorageError::Decode)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Persisted state of a row as last read or written by the unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub fields: Fields,
    pub version: u32,
}

impl Snapshot {
    /// Persisted owning tenant, if the row has one.
    #[must_use]
    pub fn tenant_id(&self) -> Option<Uuid> {
        self.fields.get(columns::TENANT_ID).and_then(|v| v.as_uuid())
    }
}

/// An entity queued for commit, with the snapshot it was loaded from.
pub struct PendingEntity {
    pub entity: Box<dyn TrackedEntity>,
    /// `None` for entities that have never been persisted.
    pub snapshot: Option<Snapshot>,
}

impl PendingEntity {
    pub fn new(entity: Box<dyn TrackedEntity>, snapshot: Option<Snapshot>) -> Self {
        Self { entity, snapshot }
    }

    /// Whether any persisted column differs from the snapshot. New entities
    /// always count as modified.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Decode`] if the entity cannot be serialized.
    pub fn is_modified(&self) -> Result<bool, StorageError> {
        match &self.snapshot {
            Some(snapshot) => Ok(self.entity.fields()? != snapshot.fields),
            None => Ok(true),
        }
    }

    /// Downcasts the held entity.
    #[must_use]
    pub fn downcast_ref<T: Entity>(&self) -> Option<&T> {
        self.entity.as_any().downcast_ref()
    }
}

impl fmt::Debug for PendingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEntity")
            .field("table", &self.entity.table().name)
            .field("id", &self.entity.entity_id())
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

/// Everything a commit is about to write, grouped by intent.
///
/// The four sets are disjoint. Flush interceptors may mutate entities and
/// move them between sets; whatever is left afterwards is what gets written.
#[derive(Debug, Default)]
pub struct PendingChanges {
    /// Entities never persisted before.
    pub new: Vec<PendingEntity>,
    /// Loaded entities re-added after mutation.
    pub dirty: Vec<PendingEntity>,
    /// Entities marked for deletion. Rows still here after interception are
    /// removed physically.
    pub deleted: Vec<PendingEntity>,
    /// Entities explicitly escalated to physical removal.
    pub purged: Vec<PendingEntity>,
}

impl PendingChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.dirty.is_empty() && self.deleted.is_empty() && self.purged.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.new.len() + self.dirty.len() + self.deleted.len() + self.purged.len()
    }
}

/// Hook invoked immediately before each read.
pub trait ReadInterceptor: Send + Sync {
    /// May rewrite `select`, or fail to abort the read.
    ///
    /// # Errors
    ///
    /// Any error aborts the read; nothing is executed.
    fn before_read(&self, ctx: &RequestContext, select: &mut Select) -> Result<(), TenancyError>;
}

/// Hook invoked once per commit, before the write batch is built.
pub trait FlushInterceptor: Send + Sync {
    /// May mutate pending entities or move them between sets.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole commit; nothing is written.
    fn before_flush(
        &self,
        ctx: &RequestContext,
        changes: &mut PendingChanges,
    ) -> Result<(), TenancyError>;
}

/// Ordered set of interceptors installed on a database.
#[derive(Default, Clone)]
pub struct InterceptorChain {
    readers: Vec<Arc<dyn ReadInterceptor>>,
    flushers: Vec<Arc<dyn FlushInterceptor>>,
}

impl InterceptorChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_read(mut self, interceptor: Arc<dyn ReadInterceptor>) -> Self {
        self.readers.push(interceptor);
        self
    }

    #[must_use]
    pub fn with_flush(mut self, interceptor: Arc<dyn FlushInterceptor>) -> Self {
        self.flushers.push(interceptor);
        self
    }
}

impl ReadInterceptor for InterceptorChain {
    fn before_read(&self, ctx: &RequestContext, select: &mut Select) -> Result<(), TenancyError> {
        for reader in &self.readers {
            reader.before_read(ctx, select)?;
        }
        Ok(())
    }
}

impl FlushInterceptor for InterceptorChain {
    fn before_flush(
        &self,
        ctx: &RequestContext,
        changes: &mut PendingChanges,
    ) -> Result<(), TenancyError> {
        for flusher in &self.flushers {
            flusher.before_flush(ctx, changes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tenantry_core::{Predicate, Tenant, Value};

    use super::*;

    struct Counting {
        reads: AtomicUsize,
        flushes: AtomicUsize,
    }

    impl Counting {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                reads: AtomicUsize::new(0),
                flushes: AtomicUsize::new(0),
            })
        }
    }

    impl ReadInterceptor for Counting {
        fn before_read(&self, _: &RequestContext, select: &mut Select) -> Result<(), TenancyError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            select.add_filter(Predicate::eq("status", "active"));
            Ok(())
        }
    }

    impl FlushInterceptor for Counting {
        fn before_flush(
            &self,
            _: &RequestContext,
            _: &mut PendingChanges,
        ) -> Result<(), TenancyError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Deny;

    impl FlushInterceptor for Deny {
        fn before_flush(
            &self,
            _: &RequestContext,
            _: &mut PendingChanges,
        ) -> Result<(), TenancyError> {
            Err(TenancyError::tenant_context("denied"))
        }
    }

    #[test]
    fn chain_runs_every_interceptor_in_order() {
        let first = Counting::new();
        let second = Counting::new();
        let chain = InterceptorChain::new()
            .with_read(first.clone())
            .with_read(second.clone());

        let mut select = Select::from::<Tenant>();
        chain
            .before_read(&RequestContext::default(), &mut select)
            .unwrap();
        assert_eq!(first.reads.load(Ordering::SeqCst), 1);
        assert_eq!(second.reads.load(Ordering::SeqCst), 1);
        let Some(Predicate::And(filters)) = select.filter else {
            panic!("expected two conjoined filters");
        };
        assert_eq!(filters.len(), 2);
    }

    #[test]
    fn chain_stops_at_first_flush_error() {
        let after = Counting::new();
        let chain = InterceptorChain::new()
            .with_flush(Arc::new(Deny))
            .with_flush(after.clone());
        let err = chain
            .before_flush(&RequestContext::default(), &mut PendingChanges::default())
            .unwrap_err();
        assert!(matches!(err, TenancyError::TenantContext { .. }));
        assert_eq!(after.flushes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pending_entity_detects_real_changes_only() {
        let tenant = Tenant::new("Acme", "acme");
        let snapshot = Snapshot {
            fields: tenant.to_fields().unwrap(),
            version: 1,
        };
        let unchanged = PendingEntity::new(Box::new(tenant.clone()), Some(snapshot.clone()));
        assert!(!unchanged.is_modified().unwrap());

        let mut renamed = tenant.clone();
        renamed.name = "Acme Corp".into();
        let changed = PendingEntity::new(Box::new(renamed), Some(snapshot));
        assert!(changed.is_modified().unwrap());
        assert_eq!(changed.downcast_ref::<Tenant>().unwrap().name, "Acme Corp");

        let fresh = PendingEntity::new(Box::new(tenant), None);
        assert!(fresh.is_modified().unwrap());
    }

    #[test]
    fn snapshot_reads_persisted_tenant() {
        let tenant = Uuid::new_v4();
        let mut fields = Fields::new();
        fields.insert("tenant_id".into(), Value::from(tenant));
        let snapshot = Snapshot { fields, version: 3 };
        assert_eq!(snapshot.tenant_id(), Some(tenant));
    }
}
