//! Tenantry server binary.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tenantry_core::SystemClock;
use tenantry_server::network::{NetworkConfig, NetworkModule};
use tenantry_server::policy::isolated_database;
use tenantry_server::service::{ProvisionTenant, TenantService};
use tenantry_server::storage::HashMapStorage;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Multi-tenant HTTP server with tenant isolation and audit stamping.
#[derive(Parser, Debug)]
#[command(name = "tenantry-server", version, about)]
struct ServerArgs {
    /// Bind address
    #[arg(long, env = "TENANTRY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on (0 picks a free port)
    #[arg(long, env = "TENANTRY_PORT", default_value_t = 8080)]
    port: u16,

    /// Maximum time to handle one request, in seconds
    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,

    /// How long shutdown waits for running requests, in seconds
    #[arg(long, default_value_t = 30)]
    drain_timeout_secs: u64,

    /// Allowed CORS origin; repeat for several, `*` for any
    #[arg(long = "cors-origin", default_value = "*")]
    cors_origins: Vec<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Slug of a tenant to provision at start-up
    #[arg(long, requires = "bootstrap_owner")]
    bootstrap_slug: Option<String>,

    /// User id of the bootstrap tenant's owner
    #[arg(long, requires = "bootstrap_slug")]
    bootstrap_owner: Option<Uuid>,
}

impl ServerArgs {
    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
        }
    }

    fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
        if self.log_json {
            builder.json().init();
        } else {
            builder.init();
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    args.init_tracing();

    let db = isolated_database(Arc::new(HashMapStorage::new()), Arc::new(SystemClock));

    if let (Some(slug), Some(owner)) = (args.bootstrap_slug.clone(), args.bootstrap_owner) {
        let (tenant, _) = TenantService::new(db.clone()).provision(ProvisionTenant {
            name: slug.clone(),
            slug,
            owner,
            region: None,
            is_personal: false,
        })?;
        info!(tenant_id = %tenant.id, %owner, "bootstrap tenant ready");
    }

    let mut module = NetworkModule::new(args.network_config(), db);
    let port = module.start().await?;
    info!(port, "tenantry server starting");
    module.serve(shutdown_signal()).await
}
