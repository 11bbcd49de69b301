//! Tenant lifecycle: provisioning and administrative changes.

use tenantry_core::{MemberRole, RequestContext, Tenant, TenantMember, TenantStatus};
use uuid::Uuid;

use crate::context;
use crate::error::TenancyError;
use crate::storage::{Database, UnitOfWork};

/// Input to [`TenantService::provision`].
#[derive(Debug, Clone)]
pub struct ProvisionTenant {
    pub name: String,
    pub slug: String,
    /// User who becomes the tenant's first owner.
    pub owner: Uuid,
    pub region: Option<String>,
    pub is_personal: bool,
}

#[derive(Clone)]
pub struct TenantService {
    db: Database,
}

impl TenantService {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates a tenant and its active owner membership in one commit.
    ///
    /// Runs under system access with the owner as actor, since no tenant
    /// exists yet to scope the request to.
    ///
    /// # Errors
    ///
    /// [`TenancyError::InvalidSlug`] for a malformed slug; a unique
    /// violation if the slug is taken.
    pub fn provision(&self, request: ProvisionTenant) -> Result<(Tenant, TenantMember), TenancyError> {
        if !Tenant::validate_slug(&request.slug) {
            return Err(TenancyError::InvalidSlug { slug: request.slug });
        }

        let mut tenant = Tenant::new(request.name, request.slug);
        tenant.region = request.region;
        tenant.is_personal = request.is_personal;
        let owner = TenantMember::active(
            tenant.id,
            request.owner,
            MemberRole::Owner,
            self.db.clock().now(),
        );
        let (tenant_id, member_id) = (tenant.id, owner.id);

        context::sync_scope(RequestContext::system(Some(request.owner), false), || {
            let mut uow = self.db.unit_of_work();
            uow.add(tenant);
            uow.add(owner);
            uow.commit()?;

            let tenant = uow.get::<Tenant>(tenant_id)?;
            let owner = uow.get::<TenantMember>(member_id)?;
            let (Some(tenant), Some(owner)) = (tenant, owner) else {
                return Err(TenancyError::NotFound { entity: "tenant" });
            };
            tracing::info!(tenant_id = %tenant.id, slug = %tenant.slug, "provisioned tenant");
            Ok((tenant, owner))
        })
    }

    /// The tenant named by the request context.
    ///
    /// # Errors
    ///
    /// [`TenancyError::TenantContext`] without a tenant in context;
    /// [`TenancyError::NotFound`] if it does not exist or is soft-deleted.
    pub fn current(&self, uow: &mut UnitOfWork) -> Result<Tenant, TenancyError> {
        let Some(tenant_id) = context::current().tenant_id else {
            return Err(TenancyError::tenant_context(
                "this operation requires a tenant in the request context",
            ));
        };
        uow.get::<Tenant>(tenant_id)?
            .ok_or(TenancyError::NotFound { entity: "tenant" })
    }

    /// # Errors
    ///
    /// Storage errors, including a version conflict on concurrent changes.
    pub fn rename(
        &self,
        uow: &mut UnitOfWork,
        mut tenant: Tenant,
        name: String,
    ) -> Result<Tenant, TenancyError> {
        tenant.name = name;
        Self::save(uow, tenant)
    }

    /// # Errors
    ///
    /// Storage errors, including a version conflict on concurrent changes.
    pub fn suspend(&self, uow: &mut UnitOfWork, mut tenant: Tenant) -> Result<Tenant, TenancyError> {
        tenant.status = TenantStatus::Suspended;
        Self::save(uow, tenant)
    }

    /// Marks the tenant deleted. The row is kept; the flush stamper records
    /// who deleted it and when.
    ///
    /// # Errors
    ///
    /// Storage errors, including a version conflict on concurrent changes.
    pub fn soft_delete(&self, uow: &mut UnitOfWork, mut tenant: Tenant) -> Result<(), TenancyError> {
        let tenant_id = tenant.id;
        tenant.status = TenantStatus::Deleted;
        uow.delete(tenant)?;
        uow.commit()?;
        tracing::info!(%tenant_id, "soft-deleted tenant");
        Ok(())
    }

    fn save(uow: &mut UnitOfWork, tenant: Tenant) -> Result<Tenant, TenancyError> {
        let id = tenant.id;
        uow.add(tenant);
        uow.commit()?;
        uow.get::<Tenant>(id)?
            .ok_or(TenancyError::NotFound { entity: "tenant" })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tenantry_core::{ContextOverrides, ManualClock};

    use super::*;
    use crate::policy::isolated_database;
    use crate::storage::HashMapStorage;

    fn service() -> TenantService {
        TenantService::new(isolated_database(
            Arc::new(HashMapStorage::new()),
            Arc::new(ManualClock::new(500)),
        ))
    }

    fn request(slug: &str, owner: Uuid) -> ProvisionTenant {
        ProvisionTenant {
            name: "Acme".into(),
            slug: slug.into(),
            owner,
            region: Some("eu-west".into()),
            is_personal: false,
        }
    }

    #[test]
    fn provision_creates_tenant_and_owner() {
        let svc = service();
        let owner = Uuid::new_v4();
        let (tenant, member) = svc.provision(request("acme", owner)).unwrap();
        assert_eq!(tenant.region.as_deref(), Some("eu-west"));
        assert_eq!(tenant.audit.created_by, Some(owner));
        assert_eq!(tenant.audit.version, 1);
        assert_eq!(member.tenant_id(), Some(tenant.id));
        assert_eq!(member.role, MemberRole::Owner);
        assert_eq!(member.joined_at, Some(500));
    }

    #[test]
    fn provision_rejects_bad_and_duplicate_slugs() {
        let svc = service();
        let err = svc.provision(request("Not A Slug", Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, TenancyError::InvalidSlug { .. }));

        svc.provision(request("acme", Uuid::new_v4())).unwrap();
        let err = svc.provision(request("acme", Uuid::new_v4())).unwrap_err();
        assert_eq!(err.kind(), "unique_violation");
    }

    #[test]
    fn soft_deleted_tenant_is_no_longer_current() {
        let svc = service();
        let owner = Uuid::new_v4();
        let (tenant, _) = svc.provision(request("acme", owner)).unwrap();
        let ctx = RequestContext::for_tenant(Some(tenant.id), Some(owner));

        context::sync_scope(ctx, || {
            let mut uow = svc.db.unit_of_work();
            let current = svc.current(&mut uow).unwrap();
            let renamed = svc.rename(&mut uow, current, "Acme Corp".into()).unwrap();
            assert_eq!(renamed.name, "Acme Corp");
            assert_eq!(renamed.audit.version, 2);

            svc.soft_delete(&mut uow, renamed).unwrap();
            assert!(matches!(
                svc.current(&mut uow),
                Err(TenancyError::NotFound { .. })
            ));
        });

        let row = svc.db.engine().get("tenants", tenant.id).unwrap();
        assert_eq!(row.column("deleted_by"), Some(owner.into()));
        assert_eq!(row.column("status"), Some("deleted".into()));
    }

    #[test]
    fn current_requires_tenant_in_context() {
        let svc = service();
        context::sync_scope(RequestContext::default(), || {
            let err = svc.current(&mut svc.db.unit_of_work()).unwrap_err();
            assert!(matches!(err, TenancyError::TenantContext { .. }));
        });
    }

    #[test]
    fn current_follows_ambient_access_flags() {
        let svc = service();
        let owner = Uuid::new_v4();
        let (tenant, _) = svc.provision(request("acme", owner)).unwrap();
        let ctx = RequestContext::for_tenant(Some(tenant.id), Some(owner));
        context::sync_scope(ctx, || {
            let mut uow = svc.db.unit_of_work();
            let current = svc.current(&mut uow).unwrap();
            svc.soft_delete(&mut uow, current).unwrap();
        });

        let deleted = context::sync_scope(
            ctx.derive(ContextOverrides::default().include_deleted(true)),
            || svc.current(&mut svc.db.unit_of_work()),
        )
        .unwrap();
        assert!(deleted.soft_delete.is_deleted());

        context::sync_scope(RequestContext::system(Some(owner), true), || {
            let err = svc.current(&mut svc.db.unit_of_work()).unwrap_err();
            assert!(matches!(err, TenancyError::TenantContext { .. }));
        });
    }
}
