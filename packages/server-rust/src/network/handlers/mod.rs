//! HTTP handler definitions.
//!
//! Defines [`AppState`], the shared state carried through axum extractors,
//! and re-exports every handler for building the router.

pub mod health;
pub mod members;
pub mod tenant;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use members::{
    accept_invitation_handler, change_role_handler, invite_member_handler, list_members_handler,
    remove_member_handler,
};
pub use tenant::{delete_tenant_handler, get_tenant_handler, rename_tenant_handler};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::service::{MembershipService, TenantService};
use crate::storage::Database;

/// Shared application state passed to all handlers via `State` extraction.
///
/// Cloning is cheap: every field is reference counted.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub tenants: TenantService,
    pub members: MembershipService,
    pub shutdown: Arc<ShutdownController>,
    /// Used for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(db: Database, shutdown: Arc<ShutdownController>) -> Self {
        Self {
            tenants: TenantService::new(db.clone()),
            members: MembershipService::new(Arc::clone(db.clock())),
            db,
            shutdown,
            start_time: Instant::now(),
        }
    }
}
