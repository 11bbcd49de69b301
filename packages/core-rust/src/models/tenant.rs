//! Tenant model: the top-level isolation boundary.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{AuditFields, Capabilities, Entity, SoftDelete, TableDescriptor};

/// Lowercase alphanumeric runs separated by single hyphens.
static SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("slug pattern is valid"));

const SLUG_LEN: std::ops::RangeInclusive<usize> = 3..=63;

/// Lifecycle status of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

impl TenantStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deleted => "deleted",
        }
    }
}

/// An isolated workspace.
///
/// Tenants are never physically deleted. The tenant row itself is not
/// tenant-scoped (it has no `tenant_id` column); access to it is controlled
/// by membership guards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    /// Globally unique, URL-safe identifier.
    pub slug: String,
    pub status: TenantStatus,
    pub region: Option<String>,
    /// Free-form settings blob.
    pub settings: serde_json::Value,
    pub is_personal: bool,
    #[serde(flatten)]
    pub soft_delete: SoftDelete,
    #[serde(flatten)]
    pub audit: AuditFields,
}

impl Tenant {
    /// Builds a new, not yet persisted, active tenant.
    #[must_use]
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            slug: slug.into(),
            status: TenantStatus::Active,
            region: None,
            settings: serde_json::Value::Object(serde_json::Map::new()),
            is_personal: false,
            soft_delete: SoftDelete::default(),
            audit: AuditFields::default(),
        }
    }

    /// Returns `true` if `slug` is an acceptable tenant slug.
    #[must_use]
    pub fn validate_slug(slug: &str) -> bool {
        SLUG_LEN.contains(&slug.len()) && SLUG_PATTERN.is_match(slug)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active && !self.soft_delete.is_deleted()
    }
}

impl Capabilities for Tenant {
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

impl Entity for Tenant {
    const TABLE: TableDescriptor = TableDescriptor {
        name: "tenants",
        tenant_scoped: false,
        soft_delete: true,
        audited: true,
        unique: &[&["slug"]],
    };

    fn id(&self) -> Uuid {
        self.id
    }
}
