//! Handlers for memberships of the caller's current tenant.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tenantry_core::{MemberRole, TenantMember};
use uuid::Uuid;

use super::AppState;
use crate::auth::{require_membership, require_role, MembershipGuard};
use crate::error::TenancyError;

#[derive(Debug, Deserialize)]
pub struct InviteMember {
    pub user_id: Uuid,
    #[serde(default = "default_role")]
    pub role: MemberRole,
}

fn default_role() -> MemberRole {
    MemberRole::Member
}

#[derive(Debug, Deserialize)]
pub struct ChangeRole {
    pub role: MemberRole,
}

fn managers() -> MembershipGuard {
    require_role([MemberRole::Owner, MemberRole::Admin], false)
}

/// Only owners may grant the owner role or act on an existing owner.
fn ensure_owner_for(
    caller: &TenantMember,
    roles: impl IntoIterator<Item = MemberRole>,
) -> Result<(), TenancyError> {
    if caller.role != MemberRole::Owner && roles.into_iter().any(|r| r == MemberRole::Owner) {
        tracing::warn!(member_id = %caller.id, role = caller.role.as_str(), "owner-only change denied");
        return Err(TenancyError::InsufficientRole { role: caller.role });
    }
    Ok(())
}

/// `GET /tenant/members`
///
/// # Errors
///
/// Guard failures.
pub async fn list_members_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, TenancyError> {
    let mut uow = state.db.unit_of_work();
    let tenant = state.tenants.current(&mut uow)?;
    require_membership(false).check(&tenant, &mut uow)?;
    let members = state.members.list(&mut uow)?;
    Ok(Json(json!({ "members": members })))
}

/// `POST /tenant/members`: owners and admins invite.
///
/// # Errors
///
/// Guard failures; 409 if the user already has a membership.
pub async fn invite_member_handler(
    State(state): State<AppState>,
    Json(body): Json<InviteMember>,
) -> Result<(StatusCode, Json<serde_json::Value>), TenancyError> {
    let mut uow = state.db.unit_of_work();
    let tenant = state.tenants.current(&mut uow)?;
    let caller = managers().check(&tenant, &mut uow)?;
    ensure_owner_for(&caller, [body.role])?;
    let member = state.members.invite(&mut uow, body.user_id, body.role)?;
    Ok((StatusCode::CREATED, Json(json!({ "member": member }))))
}

/// `POST /tenant/members/accept`: the invited caller accepts.
///
/// # Errors
///
/// Guard failures.
pub async fn accept_invitation_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, TenancyError> {
    let mut uow = state.db.unit_of_work();
    let tenant = state.tenants.current(&mut uow)?;
    require_membership(true).check(&tenant, &mut uow)?;
    let member = state.members.accept(&mut uow)?;
    Ok(Json(json!({ "member": member })))
}

/// `PATCH /tenant/members/{member_id}`
///
/// # Errors
///
/// Guard failures, `NotFound`, or `LastOwner`.
pub async fn change_role_handler(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
    Json(body): Json<ChangeRole>,
) -> Result<Json<serde_json::Value>, TenancyError> {
    let mut uow = state.db.unit_of_work();
    let tenant = state.tenants.current(&mut uow)?;
    let caller = managers().check(&tenant, &mut uow)?;
    let target = state.members.get(&mut uow, member_id)?;
    ensure_owner_for(&caller, [target.role, body.role])?;
    let member = state.members.change_role(&mut uow, member_id, body.role)?;
    Ok(Json(json!({ "member": member })))
}

/// `DELETE /tenant/members/{member_id}`
///
/// # Errors
///
/// Guard failures, `NotFound`, or `LastOwner`.
pub async fn remove_member_handler(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
) -> Result<StatusCode, TenancyError> {
    let mut uow = state.db.unit_of_work();
    let tenant = state.tenants.current(&mut uow)?;
    let caller = managers().check(&tenant, &mut uow)?;
    let target = state.members.get(&mut uow, member_id)?;
    ensure_owner_for(&caller, [target.role])?;
    state.members.remove(&mut uow, member_id)?;
    Ok(StatusCode::NO_CONTENT)
}
