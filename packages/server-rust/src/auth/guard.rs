//! Membership and role guard.
//!
//! A guard resolves the calling actor's membership in a tenant and either
//! returns it or fails with exactly one of, in order of evaluation:
//!
//! 1. [`TenancyError::Unauthenticated`]: no actor in the request context
//! 2. [`TenancyError::NotMember`]: no active or invited membership row
//! 3. [`TenancyError::InactiveMembership`]: invited, and invitations are not accepted
//! 4. [`TenancyError::InsufficientRole`]: role outside the allowed set

use std::collections::HashSet;

use tenantry_core::{ContextOverrides, MemberRole, MemberStatus, Predicate, Tenant, TenantMember};

use crate::context;
use crate::error::TenancyError;
use crate::storage::UnitOfWork;

/// Composable membership check. Build with [`require_membership`] or
/// [`require_role`].
#[derive(Debug, Clone)]
pub struct MembershipGuard {
    /// `None` accepts every role.
    allowed_roles: Option<HashSet<MemberRole>>,
    allow_invited: bool,
}

/// Guard passing any active member, plus invited ones if `allow_invited`.
#[must_use]
pub fn require_membership(allow_invited: bool) -> MembershipGuard {
    MembershipGuard {
        allowed_roles: None,
        allow_invited,
    }
}

/// Guard passing members whose role is in `roles`.
#[must_use]
pub fn require_role(
    roles: impl IntoIterator<Item = MemberRole>,
    allow_invited: bool,
) -> MembershipGuard {
    MembershipGuard {
        allowed_roles: Some(roles.into_iter().collect()),
        allow_invited,
    }
}

impl MembershipGuard {
    /// Resolves the current actor's membership in `tenant`.
    ///
    /// The lookup is scoped to `tenant` and to live rows regardless of the
    /// ambient context, including system contexts with global access or
    /// deleted rows visible.
    ///
    /// # Errors
    ///
    /// One of the outcomes listed in the module docs, or a storage error.
    pub fn check(&self, tenant: &Tenant, uow: &mut UnitOfWork) -> Result<TenantMember, TenancyError> {
        let ctx = context::current();
        let Some(actor_id) = ctx.actor_id else {
            tracing::warn!(tenant_id = %tenant.id, "guard denied: unauthenticated");
            return Err(TenancyError::Unauthenticated);
        };

        let lookup = ctx.derive(
            ContextOverrides::default()
                .tenant(Some(tenant.id))
                .allow_global_access(false)
                .include_deleted(false),
        );
        let membership = context::sync_scope(lookup, || {
            uow.first::<TenantMember>(
                Predicate::eq("tenant_id", tenant.id)
                    .and(Predicate::eq("user_id", actor_id))
                    .and(Predicate::is_in(
                        "status",
                        [MemberStatus::Active.as_str(), MemberStatus::Invited.as_str()],
                    )),
            )
        })?;

        let Some(membership) = membership else {
            tracing::warn!(tenant_id = %tenant.id, %actor_id, "guard denied: not a member");
            return Err(TenancyError::NotMember);
        };

        if membership.status != MemberStatus::Active
            && !(self.allow_invited && membership.status == MemberStatus::Invited)
        {
            tracing::warn!(
                tenant_id = %tenant.id,
                %actor_id,
                status = membership.status.as_str(),
                "guard denied: inactive membership"
            );
            return Err(TenancyError::InactiveMembership {
                status: membership.status.as_str(),
            });
        }

        if let Some(roles) = &self.allowed_roles {
            if !roles.contains(&membership.role) {
                tracing::warn!(
                    tenant_id = %tenant.id,
                    %actor_id,
                    role = membership.role.as_str(),
                    "guard denied: insufficient role"
                );
                return Err(TenancyError::InsufficientRole {
                    role: membership.role,
                });
            }
        }

        Ok(membership)
    }
}
