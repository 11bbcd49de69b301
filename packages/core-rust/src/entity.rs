//! Entity capabilities and the persistence contract.
//!
//! Shared column groups are modelled as independent capability structs that
//! entities embed with `#[serde(flatten)]`:
//!
//! - [`TenantScope`]: the owning `tenant_id`
//! - [`SoftDelete`]: `deleted_at` / `deleted_by`
//! - [`AuditFields`]: `created_by` / `updated_by` / `version`
//!
//! Policy code never sees concrete entity types. It reaches these groups
//! through the object-safe [`Capabilities`] trait, and learns which columns a
//! table has from its [`TableDescriptor`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Fields, Value};

/// Column names shared by every entity that embeds the capability structs.
pub mod columns {
    pub const ID: &str = "id";
    pub const TENANT_ID: &str = "tenant_id";
    pub const DELETED_AT: &str = "deleted_at";
    pub const DELETED_BY: &str = "deleted_by";
    pub const CREATED_BY: &str = "created_by";
    pub const UPDATED_BY: &str = "updated_by";
    pub const VERSION: &str = "version";
}

/// Ownership of a row by exactly one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TenantScope {
    pub tenant_id: Option<Uuid>,
}

/// Logical deletion marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SoftDelete {
    /// Millis since epoch when the row was soft-deleted.
    pub deleted_at: Option<u64>,
    pub deleted_by: Option<Uuid>,
}

impl SoftDelete {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Actor stamps and the optimistic-concurrency counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuditFields {
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    /// 0 until first persisted, then incremented on every committed update.
    pub version: u32,
}

/// Static description of a table: its name, which capabilities its rows
/// carry, and its unique constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: &'static str,
    pub tenant_scoped: bool,
    pub soft_delete: bool,
    pub audited: bool,
    /// Each entry is a set of columns whose combined values must be unique.
    pub unique: &'static [&'static [&'static str]],
}

/// Object-safe access to an entity's capability structs.
///
/// Every accessor defaults to `None`, meaning "this entity does not carry
/// that capability". The `_mut` variants must return `Some` exactly when the
/// shared variants do.
pub trait Capabilities {
    fn tenant_scope(&self) -> Option<&TenantScope> {
        None
    }

    fn tenant_scope_mut(&mut self) -> Option<&mut TenantScope> {
        None
    }

    fn soft_delete(&self) -> Option<&SoftDelete> {
        None
    }

    fn soft_delete_mut(&mut self) -> Option<&mut SoftDelete> {
        None
    }

    fn audit(&self) -> Option<&AuditFields> {
        None
    }

    fn audit_mut(&mut self) -> Option<&mut AuditFields> {
        None
    }
}

/// A persisted record type.
///
/// Rows are stored as [`Fields`]; the default conversions go through
/// `serde_json`, so an entity only has to derive `Serialize`/`Deserialize`
/// and flatten its capability structs.
pub trait Entity: Capabilities + Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table this entity is mapped to.
    const TABLE: TableDescriptor;

    /// Primary key.
    fn id(&self) -> Uuid;

    /// Serializes the entity into a column map.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity does not serialize to a JSON object.
    fn to_fields(&self) -> anyhow::Result<Fields> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => {
                Ok(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
            other => anyhow::bail!(
                "entity for table {} serialized to non-object {other}",
                Self::TABLE.name
            ),
        }
    }

    /// Rebuilds an entity from a stored column map.
    ///
    /// # Errors
    ///
    /// Returns an error if a column is missing or has the wrong shape.
    fn from_fields(fields: &Fields) -> anyhow::Result<Self> {
        let object: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
            .collect();
        Ok(serde_json::from_value(serde_json::Value::Object(object))?)
    }
}
