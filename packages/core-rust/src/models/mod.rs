//! Persisted tenancy models.

pub mod member;
pub mod tenant;

pub use member::{MemberRole, MemberStatus, TenantMember};
pub use tenant::{Tenant, TenantStatus};
