//! Tenant isolation and audit policy.
//!
//! [`TenantFilter`] scopes every read; [`AuditStamper`] stamps every
//! commit. [`tenant_policy`] installs both on an [`InterceptorChain`].

pub mod filter;
pub mod stamper;

use std::sync::Arc;

use tenantry_core::ClockSource;

pub use filter::TenantFilter;
pub use stamper::AuditStamper;

use crate::storage::{Database, InterceptorChain, StorageEngine};

/// Interceptor chain enforcing tenant isolation, soft delete, and audit stamps.
#[must_use]
pub fn tenant_policy(clock: Arc<dyn ClockSource>) -> InterceptorChain {
    InterceptorChain::new()
        .with_read(Arc::new(TenantFilter))
        .with_flush(Arc::new(AuditStamper::new(clock)))
}

/// A [`Database`] with [`tenant_policy`] installed.
#[must_use]
pub fn isolated_database(engine: Arc<dyn StorageEngine>, clock: Arc<dyn ClockSource>) -> Database {
    Database::new(engine, tenant_policy(Arc::clone(&clock)), clock)
}
