//! Network module with deferred startup lifecycle.
//!
//! `new()` wires shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown future resolves. The
//! split lets callers learn the bound port (e.g. port 0 in tests) before
//! serving.

use std::future::Future;
use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, patch, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    accept_invitation_handler, change_role_handler, delete_tenant_handler, get_tenant_handler,
    health_handler, invite_member_handler, list_members_handler, liveness_handler,
    readiness_handler, remove_member_handler, rename_tenant_handler, AppState,
};
use super::middleware::{build_http_layers, tenant_context_middleware, track_in_flight};
use super::shutdown::ShutdownController;
use crate::storage::Database;

/// Owns the HTTP server lifecycle.
pub struct NetworkModule {
    config: NetworkConfig,
    db: Database,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, db: Database) -> Self {
        Self {
            config,
            db,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health`, `GET /health/live`, `GET /health/ready`
    /// - `GET | PATCH | DELETE /tenant`
    /// - `GET | POST /tenant/members`
    /// - `POST /tenant/members/accept`
    /// - `PATCH | DELETE /tenant/members/{member_id}`
    ///
    /// Every route runs inside the tenant context middleware.
    pub fn build_router(&self) -> Router {
        let state = AppState::new(self.db.clone(), Arc::clone(&self.shutdown));

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route(
                "/tenant",
                get(get_tenant_handler)
                    .patch(rename_tenant_handler)
                    .delete(delete_tenant_handler),
            )
            .route(
                "/tenant/members",
                get(list_members_handler).post(invite_member_handler),
            )
            .route("/tenant/members/accept", post(accept_invitation_handler))
            .route(
                "/tenant/members/{member_id}",
                patch(change_role_handler).delete(remove_member_handler),
            )
            .layer(from_fn(tenant_context_middleware))
            .layer(from_fn_with_state(Arc::clone(&self.shutdown), track_in_flight))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the listener and returns the actual port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves requests until `shutdown` resolves, then waits up to the
    /// configured drain timeout for in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or on a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener.take() else {
            anyhow::bail!("start() must be called before serve()");
        };
        let router = self.build_router();
        self.shutdown.set_ready();

        info!("serving HTTP connections");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        self.shutdown.trigger_shutdown();
        if self.shutdown.wait_for_drain(self.config.drain_timeout).await {
            info!("all requests drained");
        } else {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "drain timeout expired with requests still running"
            );
        }
        Ok(())
    }
}
