//! Entry point for creating fully-wired [`UnitOfWork`] instances.
//!
//! [`Database`] is the dependency injection point of the data-mapping
//! layer: it holds the shared [`StorageEngine`], the [`InterceptorChain`]
//! installed on every unit of work, and the [`ClockSource`] that stamps
//! row metadata.

use std::sync::Arc;

use tenantry_core::{ClockSource, SystemClock};

use crate::storage::engine::StorageEngine;
use crate::storage::engines::HashMapStorage;
use crate::storage::interceptor::InterceptorChain;
use crate::storage::unit_of_work::UnitOfWork;

/// Shared handle to storage plus the interceptors applied to it.
///
/// Cheap to clone; every request creates its own [`UnitOfWork`] from it.
#[derive(Clone)]
pub struct Database {
    engine: Arc<dyn StorageEngine>,
    interceptors: InterceptorChain,
    clock: Arc<dyn ClockSource>,
}

impl Database {
    #[must_use]
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        interceptors: InterceptorChain,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            engine,
            interceptors,
            clock,
        }
    }

    /// Empty in-memory database without interceptors.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(HashMapStorage::new()),
            InterceptorChain::new(),
            Arc::new(SystemClock),
        )
    }

    /// Starts a new unit of work with this database's interceptors installed.
    #[must_use]
    pub fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::new(
            Arc::clone(&self.engine),
            self.interceptors.clone(),
            Arc::clone(&self.clock),
        )
    }

    /// Raw engine access, bypassing every interceptor.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn ClockSource> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use tenantry_core::{RequestContext, Tenant};

    use super::*;
    use crate::context;

    #[test]
    fn units_of_work_share_the_engine() {
        let db = Database::in_memory();
        context::sync_scope(RequestContext::system(None, false), || {
            let mut writer = db.unit_of_work();
            let tenant = Tenant::new("Acme", "acme");
            let id = tenant.id;
            writer.add(tenant);
            writer.commit().unwrap();

            let mut reader = db.clone().unit_of_work();
            let found: Option<Tenant> = reader.get(id).unwrap();
            assert_eq!(found.map(|t| t.slug), Some("acme".to_string()));
        });
        assert_eq!(db.engine().count("tenants"), 1);
    }
}
