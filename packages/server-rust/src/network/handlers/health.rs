//! Health, liveness, and readiness endpoint handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use tenantry_core::{RequestContext, Tenant};

use super::AppState;
use crate::context;
use crate::error::TenancyError;
use crate::network::HealthState;

/// Detailed health JSON. Always 200; `state` tells whether the server is
/// actually serving.
///
/// # Errors
///
/// Fails only if the tenant count cannot be read.
pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, TenancyError> {
    let tenants = context::sync_scope(RequestContext::system(None, false), || {
        state.db.unit_of_work().all::<Tenant>().map(|t| t.len())
    })?;

    Ok(Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "tenants": tenants,
    })))
}

/// Liveness probe: 200 whenever the process responds.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 only in the `Ready` state.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
