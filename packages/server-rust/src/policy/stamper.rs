//! Flush interceptor that stamps tenant, actor, and deletion metadata.

use std::sync::Arc;

use tenantry_core::{ClockSource, RequestContext};
use uuid::Uuid;

use crate::error::TenancyError;
use crate::storage::{FlushInterceptor, PendingChanges, PendingEntity};

/// Stamps pending entities before commit.
///
/// - New: fills `tenant_id` from the context (or rejects a foreign one) and
///   fills `created_by`/`updated_by` from the actor when unset.
/// - Dirty: rejects rows of another tenant or a changed `tenant_id`; sets
///   `updated_by` when the entity actually changed.
/// - Deleted: soft-deletable entities get `deleted_at`/`deleted_by` and move
///   to the dirty set. Others stay deleted and are removed physically.
/// - Purged: only the ownership check.
///
/// Fields that are already set are never overwritten with a different
/// value, so re-running on stamped, unchanged entities is a no-op.
pub struct AuditStamper {
    clock: Arc<dyn ClockSource>,
}

impl AuditStamper {
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self { clock }
    }
}

fn entity_tenant(pending: &PendingEntity) -> Option<Option<Uuid>> {
    pending.entity.tenant_scope().map(|scope| scope.tenant_id)
}

fn describe(pending: &PendingEntity) -> (&'static str, Uuid) {
    (pending.entity.table().name, pending.entity.entity_id())
}

fn stamp_new(ctx: &RequestContext, pending: &mut PendingEntity) -> Result<(), TenancyError> {
    let (table, id) = describe(pending);
    if let Some(scope) = pending.entity.tenant_scope_mut() {
        match (scope.tenant_id, ctx.tenant_id) {
            (None, Some(tenant)) => scope.tenant_id = Some(tenant),
            (None, None) => {
                tracing::warn!(table, %id, "insert without tenant context");
                return Err(TenancyError::tenant_context(format!(
                    "new {table} row {id} has no tenant_id and the request context has no tenant"
                )));
            }
            (Some(own), Some(tenant)) if own != tenant && !ctx.allow_global_access => {
                tracing::warn!(table, %id, "insert into foreign tenant");
                return Err(TenancyError::tenant_mismatch(table, id));
            }
            (Some(_), None) if !ctx.allow_global_access => {
                return Err(TenancyError::tenant_context(format!(
                    "new {table} row {id} requires a tenant in the request context"
                )));
            }
            (Some(_), _) => {}
        }
    }

    if let (Some(audit), Some(actor)) = (pending.entity.audit_mut(), ctx.actor_id) {
        audit.created_by.get_or_insert(actor);
        audit.updated_by.get_or_insert(actor);
    }
    Ok(())
}

/// Rejects writes to rows owned by another tenant, and any change of a
/// persisted row's `tenant_id`.
fn check_ownership(ctx: &RequestContext, pending: &PendingEntity) -> Result<(), TenancyError> {
    let Some(current) = entity_tenant(pending) else {
        return Ok(());
    };
    let (table, id) = describe(pending);
    let persisted = pending.snapshot.as_ref().and_then(|s| s.tenant_id());

    if persisted.is_some() && current != persisted {
        tracing::warn!(table, %id, "attempt to move row between tenants");
        return Err(TenancyError::tenant_context(format!(
            "{table} row {id} cannot change its tenant_id"
        )));
    }
    if ctx.allow_global_access {
        return Ok(());
    }
    let Some(tenant) = ctx.tenant_id else {
        return Err(TenancyError::tenant_context(format!(
            "writing {table} requires a tenant in the request context"
        )));
    };
    if current != Some(tenant) {
        tracing::warn!(table, %id, "write to foreign tenant row");
        return Err(TenancyError::tenant_mismatch(table, id));
    }
    Ok(())
}

impl FlushInterceptor for AuditStamper {
    fn before_flush(
        &self,
        ctx: &RequestContext,
        changes: &mut PendingChanges,
    ) -> Result<(), TenancyError> {
        for pending in &mut changes.new {
            stamp_new(ctx, pending)?;
        }

        let now = self.clock.now();
        let mut physical = Vec::new();
        for mut pending in changes.deleted.drain(..) {
            check_ownership(ctx, &pending)?;
            match pending.entity.soft_delete_mut() {
                Some(marker) => {
                    if marker.deleted_at.is_none() {
                        marker.deleted_at = Some(now);
                        marker.deleted_by = ctx.actor_id;
                    }
                    let (table, id) = describe(&pending);
                    tracing::debug!(table, %id, "converted delete into soft delete");
                    changes.dirty.push(pending);
                }
                None => physical.push(pending),
            }
        }
        changes.deleted = physical;

        for pending in &mut changes.dirty {
            check_ownership(ctx, pending)?;
            let Some(actor) = ctx.actor_id else { continue };
            if pending.is_modified()? {
                if let Some(audit) = pending.entity.audit_mut() {
                    audit.updated_by = Some(actor);
                }
            }
        }

        for pending in &changes.purged {
            check_ownership(ctx, pending)?;
        }

        tracing::debug!(
            new = changes.new.len(),
            dirty = changes.dirty.len(),
            deleted = changes.deleted.len(),
            purged = changes.purged.len(),
            "stamped pending changes"
        );
        Ok(())
    }
}
