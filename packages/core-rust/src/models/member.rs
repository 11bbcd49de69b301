//! Tenant membership: the link between an external user identity and a tenant.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{AuditFields, Capabilities, Entity, SoftDelete, TableDescriptor, TenantScope};

/// Role a member holds within a tenant, in descending order of privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl MemberRole {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }
}

/// Membership lifecycle: `invited -> active <-> suspended`, and any state -> `removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Invited,
    Active,
    Suspended,
    Removed,
}

impl MemberStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invited => "invited",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Removed => "removed",
        }
    }
}

/// A user's membership in one tenant. `(tenant_id, user_id)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantMember {
    pub id: Uuid,
    #[serde(flatten)]
    pub scope: TenantScope,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub status: MemberStatus,
    /// Millis since epoch.
    pub invited_at: Option<u64>,
    /// Millis since epoch; set when the invitation is accepted.
    pub joined_at: Option<u64>,
    #[serde(flatten)]
    pub soft_delete: SoftDelete,
    #[serde(flatten)]
    pub audit: AuditFields,
}

impl TenantMember {
    /// Builds an invitation. `tenant_id` is left unset so the flush stamper
    /// fills it from the request context.
    #[must_use]
    pub fn invite(user_id: Uuid, role: MemberRole, invited_at: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope: TenantScope::default(),
            user_id,
            role,
            status: MemberStatus::Invited,
            invited_at: Some(invited_at),
            joined_at: None,
            soft_delete: SoftDelete::default(),
            audit: AuditFields::default(),
        }
    }

    /// Builds an already-active membership for an explicit tenant.
    #[must_use]
    pub fn active(tenant_id: Uuid, user_id: Uuid, role: MemberRole, joined_at: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope: TenantScope {
                tenant_id: Some(tenant_id),
            },
            user_id,
            role,
            status: MemberStatus::Active,
            invited_at: None,
            joined_at: Some(joined_at),
            soft_delete: SoftDelete::default(),
            audit: AuditFields::default(),
        }
    }

    #[must_use]
    pub fn tenant_id(&self) -> Option<Uuid> {
        self.scope.tenant_id
    }

    /// Accepts a pending invitation. Returns `false` if the membership was not invited.
    pub fn accept(&mut self, now: u64) -> bool {
        if self.status != MemberStatus::Invited {
            return false;
        }
        self.status = MemberStatus::Active;
        self.joined_at = Some(now);
        true
    }

    /// Turns a removed membership back into a pending invitation, clearing
    /// its deletion marker.
    pub fn reinvite(&mut self, role: MemberRole, now: u64) {
        self.role = role;
        self.status = MemberStatus::Invited;
        self.invited_at = Some(now);
        self.joined_at = None;
        self.soft_delete = SoftDelete::default();
    }
}

impl Capabilities for TenantMember {
    fn tenant_scope(&self) -> Option<&TenantScope> {
        Some(&self.scope)
    }

    fn tenant_scope_mut(&mut self) -> Option<&mut TenantScope> {
        Some(&mut self.scope)
    }

    fn soft_delete(&self) -> Option<&SoftDelete> {
        Some(&self.soft_delete)
    }

    fn soft_delete_mut(&mut self) -> Option<&mut SoftDelete> {
        Some(&mut self.soft_delete)
    }

    fn audit(&self) -> Option<&AuditFields> {
        Some(&self.audit)
    }

    fn audit_mut(&mut self) -> Option<&mut AuditFields> {
        Some(&mut self.audit)
    }
}

impl Entity for TenantMember {
    const TABLE: TableDescriptor = TableDescriptor {
        name: "tenant_members",
        tenant_scoped: true,
        soft_delete: true,
        audited: true,
        unique: &[&["tenant_id", "user_id"]],
    };

    fn id(&self) -> Uuid {
        self.id
    }
}
