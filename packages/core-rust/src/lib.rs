//! Tenantry core: request context, entity capabilities, tenancy models, and query AST.

pub mod clock;
pub mod context;
pub mod entity;
pub mod models;
pub mod schema;
pub mod types;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use context::{ContextOverrides, RequestContext};
pub use entity::{AuditFields, Capabilities, Entity, SoftDelete, TableDescriptor, TenantScope};
pub use models::{MemberRole, MemberStatus, Tenant, TenantMember, TenantStatus};
pub use schema::{Join, Predicate, Select};
pub use types::{Fields, Value};
