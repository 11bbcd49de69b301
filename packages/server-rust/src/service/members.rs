//! Membership management inside the current tenant.
//!
//! Every method runs against the tenant in the request context: reads are
//! scoped by the tenant filter and new rows get their `tenant_id` from the
//! flush stamper.

use std::sync::Arc;

use tenantry_core::{
    ClockSource, ContextOverrides, MemberRole, MemberStatus, Predicate, Tenant, TenantMember,
};
use uuid::Uuid;

use crate::context;
use crate::error::TenancyError;
use crate::storage::UnitOfWork;

#[derive(Clone)]
pub struct MembershipService {
    clock: Arc<dyn ClockSource>,
}

impl MembershipService {
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self { clock }
    }

    /// Every visible membership of the current tenant, ordered by id.
    ///
    /// # Errors
    ///
    /// [`TenancyError::TenantContext`] without a tenant in context.
    pub fn list(&self, uow: &mut UnitOfWork) -> Result<Vec<TenantMember>, TenancyError> {
        uow.all::<TenantMember>()
    }

    /// Looks up one membership of the current tenant.
    ///
    /// # Errors
    ///
    /// [`TenancyError::NotFound`] for an unknown or removed member.
    pub fn get(&self, uow: &mut UnitOfWork, member_id: Uuid) -> Result<TenantMember, TenancyError> {
        Self::load(uow, member_id)
    }

    /// Invites `user_id` into the current tenant. A previously removed
    /// membership of the same user is revived as a fresh invitation.
    ///
    /// # Errors
    ///
    /// A unique violation if the user already has a live membership row.
    pub fn invite(
        &self,
        uow: &mut UnitOfWork,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<TenantMember, TenancyError> {
        let now = self.clock.now();
        let invitation = match Self::removed_membership(uow, user_id)? {
            Some(mut removed) => {
                removed.reinvite(role, now);
                removed
            }
            None => TenantMember::invite(user_id, role, now),
        };
        let id = invitation.id;
        uow.add(invitation);
        uow.commit()?;
        tracing::info!(member_id = %id, %user_id, role = role.as_str(), "invited member");
        Self::load(uow, id)
    }

    /// Accepts the calling actor's pending invitation.
    ///
    /// # Errors
    ///
    /// [`TenancyError::Unauthenticated`] without an actor;
    /// [`TenancyError::NotFound`] if the actor has no pending invitation.
    pub fn accept(&self, uow: &mut UnitOfWork) -> Result<TenantMember, TenancyError> {
        let actor_id = context::current()
            .actor_id
            .ok_or(TenancyError::Unauthenticated)?;
        let mut membership = uow
            .first::<TenantMember>(
                Predicate::eq("user_id", actor_id)
                    .and(Predicate::eq("status", MemberStatus::Invited.as_str())),
            )?
            .ok_or(TenancyError::NotFound {
                entity: "invitation",
            })?;

        membership.accept(self.clock.now());
        let id = membership.id;
        uow.add(membership);
        uow.commit()?;
        Self::load(uow, id)
    }

    /// # Errors
    ///
    /// [`TenancyError::NotFound`] for an unknown member;
    /// [`TenancyError::LastOwner`] when demoting the only active owner.
    pub fn change_role(
        &self,
        uow: &mut UnitOfWork,
        member_id: Uuid,
        role: MemberRole,
    ) -> Result<TenantMember, TenancyError> {
        Self::stage_role_change(uow, member_id, role)?;
        uow.commit()?;
        Self::load(uow, member_id)
    }

    /// Marks the membership removed and soft-deletes it.
    ///
    /// # Errors
    ///
    /// [`TenancyError::NotFound`] for an unknown member;
    /// [`TenancyError::LastOwner`] when removing the only active owner.
    pub fn remove(&self, uow: &mut UnitOfWork, member_id: Uuid) -> Result<(), TenancyError> {
        Self::stage_removal(uow, member_id)?;
        uow.commit()?;
        tracing::info!(%member_id, "removed member");
        Ok(())
    }

    fn load(uow: &mut UnitOfWork, member_id: Uuid) -> Result<TenantMember, TenancyError> {
        uow.get::<TenantMember>(member_id)?
            .ok_or(TenancyError::NotFound { entity: "member" })
    }

    fn removed_membership(
        uow: &mut UnitOfWork,
        user_id: Uuid,
    ) -> Result<Option<TenantMember>, TenancyError> {
        let ctx = context::derive(ContextOverrides::default().include_deleted(true));
        let existing = context::sync_scope(ctx, || {
            uow.first::<TenantMember>(Predicate::eq("user_id", user_id))
        })?;
        Ok(existing.filter(|m| m.soft_delete.is_deleted()))
    }

    fn stage_role_change(
        uow: &mut UnitOfWork,
        member_id: Uuid,
        role: MemberRole,
    ) -> Result<(), TenancyError> {
        let mut membership = Self::load(uow, member_id)?;
        if role != MemberRole::Owner {
            Self::ensure_not_last_owner(uow, &membership)?;
        }
        membership.role = role;
        uow.add(membership);
        Ok(())
    }

    fn stage_removal(uow: &mut UnitOfWork, member_id: Uuid) -> Result<(), TenancyError> {
        let mut membership = Self::load(uow, member_id)?;
        Self::ensure_not_last_owner(uow, &membership)?;
        membership.status = MemberStatus::Removed;
        uow.delete(membership)
    }

    /// Fails if `membership` is the only active owner. Otherwise touches the
    /// tenant row so that concurrent owner changes conflict on commit.
    fn ensure_not_last_owner(
        uow: &mut UnitOfWork,
        membership: &TenantMember,
    ) -> Result<(), TenancyError> {
        if membership.role != MemberRole::Owner || membership.status != MemberStatus::Active {
            return Ok(());
        }
        let owners = uow.find::<TenantMember>(
            Predicate::eq("role", MemberRole::Owner.as_str())
                .and(Predicate::eq("status", MemberStatus::Active.as_str())),
        )?;
        if owners.len() <= 1 {
            return Err(TenancyError::LastOwner);
        }
        let tenant = membership
            .tenant_id()
            .map(|id| uow.get::<Tenant>(id))
            .transpose()?
            .flatten()
            .ok_or(TenancyError::NotFound { entity: "tenant" })?;
        uow.touch(tenant)
    }
}

#[cfg(test)]
mod tests {
    use tenantry_core::{ManualClock, RequestContext, Tenant};

    use super::*;
    use crate::policy::isolated_database;
    use crate::service::{ProvisionTenant, TenantService};
    use crate::storage::{Database, HashMapStorage};

    struct Fixture {
        db: Database,
        svc: MembershipService,
        clock: Arc<ManualClock>,
        tenant: Tenant,
        owner: TenantMember,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(100));
        let db = isolated_database(Arc::new(HashMapStorage::new()), clock.clone());
        let (tenant, owner) = TenantService::new(db.clone())
            .provision(ProvisionTenant {
                name: "Acme".into(),
                slug: "acme".into(),
                owner: Uuid::new_v4(),
                region: None,
                is_personal: false,
            })
            .unwrap();
        Fixture {
            svc: MembershipService::new(clock.clone()),
            db,
            clock,
            tenant,
            owner,
        }
    }

    impl Fixture {
        fn as_actor<R>(&self, actor: Uuid, body: impl FnOnce(&mut UnitOfWork) -> R) -> R {
            let ctx = RequestContext::for_tenant(Some(self.tenant.id), Some(actor));
            context::sync_scope(ctx, || body(&mut self.db.unit_of_work()))
        }
    }

    #[test]
    fn invite_then_accept() {
        let fx = fixture();
        let user = Uuid::new_v4();
        let invited = fx
            .as_actor(fx.owner.user_id, |uow| fx.svc.invite(uow, user, MemberRole::Member))
            .unwrap();
        assert_eq!(invited.tenant_id(), Some(fx.tenant.id));
        assert_eq!(invited.status, MemberStatus::Invited);
        assert_eq!(invited.audit.created_by, Some(fx.owner.user_id));

        fx.clock.advance(50);
        let accepted = fx.as_actor(user, |uow| fx.svc.accept(uow)).unwrap();
        assert_eq!(accepted.status, MemberStatus::Active);
        assert_eq!(accepted.joined_at, Some(150));
        assert_eq!(accepted.audit.updated_by, Some(user));

        let err = fx.as_actor(user, |uow| fx.svc.accept(uow)).unwrap_err();
        assert!(matches!(err, TenancyError::NotFound { entity: "invitation" }));
    }

    #[test]
    fn duplicate_invitation_conflicts() {
        let fx = fixture();
        let user = Uuid::new_v4();
        fx.as_actor(fx.owner.user_id, |uow| fx.svc.invite(uow, user, MemberRole::Viewer))
            .unwrap();
        let err = fx
            .as_actor(fx.owner.user_id, |uow| fx.svc.invite(uow, user, MemberRole::Admin))
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
    }

    #[test]
    fn last_owner_cannot_be_demoted_or_removed() {
        let fx = fixture();
        let owner = fx.owner.user_id;
        let err = fx
            .as_actor(owner, |uow| fx.svc.change_role(uow, fx.owner.id, MemberRole::Admin))
            .unwrap_err();
        assert!(matches!(err, TenancyError::LastOwner));
        let err = fx
            .as_actor(owner, |uow| fx.svc.remove(uow, fx.owner.id))
            .unwrap_err();
        assert!(matches!(err, TenancyError::LastOwner));
    }

    #[test]
    fn removed_member_is_soft_deleted() {
        let fx = fixture();
        let owner = fx.owner.user_id;
        let user = Uuid::new_v4();
        let invited = fx
            .as_actor(owner, |uow| fx.svc.invite(uow, user, MemberRole::Member))
            .unwrap();

        fx.as_actor(owner, |uow| fx.svc.remove(uow, invited.id)).unwrap();
        let visible = fx.as_actor(owner, |uow| fx.svc.list(uow)).unwrap();
        assert_eq!(visible.len(), 1);

        let all = fx.as_actor(owner, |uow| {
            context::sync_scope(
                context::derive(tenantry_core::ContextOverrides::default().include_deleted(true)),
                || fx.svc.list(uow),
            )
        });
        let removed = all
            .unwrap()
            .into_iter()
            .find(|m| m.id == invited.id)
            .unwrap();
        assert_eq!(removed.status, MemberStatus::Removed);
        assert_eq!(removed.soft_delete.deleted_by, Some(owner));
    }

    #[test]
    fn removed_member_can_be_invited_again() {
        let fx = fixture();
        let owner = fx.owner.user_id;
        let user = Uuid::new_v4();
        let first = fx
            .as_actor(owner, |uow| fx.svc.invite(uow, user, MemberRole::Admin))
            .unwrap();
        fx.as_actor(owner, |uow| fx.svc.remove(uow, first.id)).unwrap();

        fx.clock.advance(10);
        let again = fx
            .as_actor(owner, |uow| fx.svc.invite(uow, user, MemberRole::Viewer))
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.status, MemberStatus::Invited);
        assert_eq!(again.role, MemberRole::Viewer);
        assert_eq!(again.invited_at, Some(110));
        assert!(!again.soft_delete.is_deleted());

        let accepted = fx.as_actor(user, |uow| fx.svc.accept(uow)).unwrap();
        assert_eq!(accepted.status, MemberStatus::Active);
        let listed = fx.as_actor(owner, |uow| fx.svc.list(uow)).unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn concurrent_owner_changes_cannot_remove_every_owner() {
        let fx = fixture();
        let owner = fx.owner.user_id;
        let second = Uuid::new_v4();
        let co_owner = fx
            .as_actor(owner, |uow| fx.svc.invite(uow, second, MemberRole::Owner))
            .unwrap();
        fx.as_actor(second, |uow| fx.svc.accept(uow)).unwrap();

        let outcome = fx.as_actor(owner, |_| {
            let mut demote = fx.db.unit_of_work();
            let mut remove = fx.db.unit_of_work();
            MembershipService::stage_role_change(&mut demote, fx.owner.id, MemberRole::Admin)?;
            MembershipService::stage_removal(&mut remove, co_owner.id)?;
            demote.commit()?;
            Ok::<_, TenancyError>(remove.commit())
        });
        let err = outcome.unwrap().unwrap_err();
        assert_eq!(err.kind(), "version_conflict");

        let owners = fx
            .as_actor(owner, |uow| fx.svc.list(uow))
            .unwrap()
            .into_iter()
            .filter(|m| m.role == MemberRole::Owner && m.status == MemberStatus::Active)
            .count();
        assert_eq!(owners, 1);
    }

    #[test]
    fn members_of_other_tenants_are_invisible() {
        let fx = fixture();
        let stranger_tenant = Uuid::new_v4();
        let ctx = RequestContext::for_tenant(Some(stranger_tenant), Some(fx.owner.user_id));
        let listed = context::sync_scope(ctx, || fx.svc.list(&mut fx.db.unit_of_work())).unwrap();
        assert!(listed.is_empty());

        let err = context::sync_scope(ctx, || {
            fx.svc
                .change_role(&mut fx.db.unit_of_work(), fx.owner.id, MemberRole::Viewer)
        })
        .unwrap_err();
        assert!(matches!(err, TenancyError::NotFound { entity: "member" }));
    }
}
