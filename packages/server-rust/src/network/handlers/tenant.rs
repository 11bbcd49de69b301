//! Handlers for the caller's current tenant.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tenantry_core::MemberRole;

use super::AppState;
use crate::auth::{require_membership, require_role};
use crate::error::TenancyError;

#[derive(Debug, Deserialize)]
pub struct RenameTenant {
    pub name: String,
}

/// `GET /tenant`: the tenant plus the caller's membership.
///
/// # Errors
///
/// Guard failures, or `NotFound` for an unknown or deleted tenant.
pub async fn get_tenant_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, TenancyError> {
    let mut uow = state.db.unit_of_work();
    let tenant = state.tenants.current(&mut uow)?;
    let membership = require_membership(false).check(&tenant, &mut uow)?;
    Ok(Json(json!({ "tenant": tenant, "membership": membership })))
}

/// `PATCH /tenant`: owners and admins may rename.
///
/// # Errors
///
/// Guard failures or storage errors.
pub async fn rename_tenant_handler(
    State(state): State<AppState>,
    Json(body): Json<RenameTenant>,
) -> Result<Json<serde_json::Value>, TenancyError> {
    let mut uow = state.db.unit_of_work();
    let tenant = state.tenants.current(&mut uow)?;
    require_role([MemberRole::Owner, MemberRole::Admin], false).check(&tenant, &mut uow)?;
    let renamed = state.tenants.rename(&mut uow, tenant, body.name)?;
    Ok(Json(json!({ "tenant": renamed })))
}

/// `DELETE /tenant`: owners only; soft-deletes the tenant.
///
/// # Errors
///
/// Guard failures or storage errors.
pub async fn delete_tenant_handler(
    State(state): State<AppState>,
) -> Result<StatusCode, TenancyError> {
    let mut uow = state.db.unit_of_work();
    let tenant = state.tenants.current(&mut uow)?;
    require_role([MemberRole::Owner], false).check(&tenant, &mut uow)?;
    state.tenants.soft_delete(&mut uow, tenant)?;
    Ok(StatusCode::NO_CONTENT)
}
