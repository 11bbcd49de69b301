//! Authorization guards consulted by request handlers.

pub mod guard;

pub use guard::{require_membership, require_role, MembershipGuard};
