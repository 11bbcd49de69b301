//! Per-request identity and access-scope value.
//!
//! [`RequestContext`] is an immutable value: every change produces a new copy
//! via [`RequestContext::derive`]. Where the value lives while a request runs
//! (the task-local context store) is a server concern.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity and scope flags of the current logical request.
///
/// The `Default` value is the maximally restrictive context: no tenant, no
/// actor, soft-deleted rows hidden, isolation enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RequestContext {
    /// Tenant every tenant-aware read and write is scoped to.
    pub tenant_id: Option<Uuid>,
    /// Actor stamped into audit fields and checked by membership guards.
    pub actor_id: Option<Uuid>,
    /// When set, reads also return soft-deleted rows.
    pub include_deleted: bool,
    /// When set, tenant isolation is bypassed entirely (administrative paths).
    pub allow_global_access: bool,
}

/// Field-by-field overrides applied by [`RequestContext::derive`].
///
/// `None` keeps the original field. For the identity fields, `Some(None)`
/// clears the value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextOverrides {
    pub tenant_id: Option<Option<Uuid>>,
    pub actor_id: Option<Option<Uuid>>,
    pub include_deleted: Option<bool>,
    pub allow_global_access: Option<bool>,
}

impl ContextOverrides {
    #[must_use]
    pub fn tenant(mut self, tenant_id: Option<Uuid>) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    #[must_use]
    pub fn actor(mut self, actor_id: Option<Uuid>) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    #[must_use]
    pub fn include_deleted(mut self, include_deleted: bool) -> Self {
        self.include_deleted = Some(include_deleted);
        self
    }

    #[must_use]
    pub fn allow_global_access(mut self, allow_global_access: bool) -> Self {
        self.allow_global_access = Some(allow_global_access);
        self
    }
}

impl RequestContext {
    /// Context for an ordinary tenant-scoped request.
    #[must_use]
    pub fn for_tenant(tenant_id: Option<Uuid>, actor_id: Option<Uuid>) -> Self {
        Self {
            tenant_id,
            actor_id,
            ..Self::default()
        }
    }

    /// Elevated context with no tenant and isolation disabled.
    #[must_use]
    pub fn system(actor_id: Option<Uuid>, include_deleted: bool) -> Self {
        Self {
            tenant_id: None,
            actor_id,
            include_deleted,
            allow_global_access: true,
        }
    }

    /// Returns a copy of `self` with the given overrides applied.
    ///
    /// `self` is never modified.
    #[must_use]
    pub fn derive(&self, overrides: ContextOverrides) -> Self {
        Self {
            tenant_id: overrides.tenant_id.unwrap_or(self.tenant_id),
            actor_id: overrides.actor_id.unwrap_or(self.actor_id),
            include_deleted: overrides.include_deleted.unwrap_or(self.include_deleted),
            allow_global_access: overrides
                .allow_global_access
                .unwrap_or(self.allow_global_access),
        }
    }

    /// Returns `true` if tenant-aware operations can run under this context,
    /// either because a tenant is set or because isolation is bypassed.
    #[must_use]
    pub fn has_usable_tenant(&self) -> bool {
        self.allow_global_access || self.tenant_id.is_some()
    }
}
