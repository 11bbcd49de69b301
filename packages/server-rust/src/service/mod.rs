//! Application services for tenants and memberships.
//!
//! Services contain no isolation logic of their own: every read and write
//! goes through a [`UnitOfWork`](crate::storage::UnitOfWork), so the tenant
//! policy installed on the database applies to them like any other caller.

pub mod members;
pub mod tenants;

pub use members::MembershipService;
pub use tenants::{ProvisionTenant, TenantService};
