//! Error taxonomy of the tenancy layer and its HTTP translation.
//!
//! Nothing in this crate retries or recovers from these errors: isolation
//! and authorization failures propagate to [`IntoResponse`], which turns
//! them into a structured JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tenantry_core::MemberRole;
use uuid::Uuid;

use crate::storage::StorageError;

/// Errors surfaced by the context store, data access, policy, and guards.
#[derive(Debug, thiserror::Error)]
pub enum TenancyError {
    /// Tenant-scoped operation without a usable tenant, or a cross-tenant write.
    #[error("tenant context error: {reason}")]
    TenantContext { reason: String },
    #[error("authentication required: no actor identifier in request context")]
    Unauthenticated,
    #[error("actor is not a member of this tenant")]
    NotMember,
    #[error("membership is not active (status: {status})")]
    InactiveMembership { status: &'static str },
    #[error("role {} is not permitted for this operation", .role.as_str())]
    InsufficientRole { role: MemberRole },
    #[error("invalid {header} header: expected a UUID")]
    InvalidHeader { header: &'static str },
    #[error("tenant_id must not be passed as a query parameter; use the {header} header")]
    TenantIdInQuery { header: &'static str },
    #[error("invalid tenant slug: {slug}")]
    InvalidSlug { slug: String },
    #[error("cannot remove or demote the last active owner of a tenant")]
    LastOwner,
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    /// `set` was called outside of any context scope.
    #[error("no request context scope is active")]
    NoActiveScope,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl TenancyError {
    pub(crate) fn tenant_context(reason: impl Into<String>) -> Self {
        Self::TenantContext {
            reason: reason.into(),
        }
    }

    pub(crate) fn tenant_mismatch(table: &str, id: Uuid) -> Self {
        Self::tenant_context(format!(
            "{table} row {id} belongs to a different tenant than the request context"
        ))
    }

    /// Stable machine-readable kind used in response bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TenantContext { .. } => "tenant_context",
            Self::Unauthenticated => "unauthenticated",
            Self::NotMember => "not_member",
            Self::InactiveMembership { .. } => "inactive_membership",
            Self::InsufficientRole { .. } => "insufficient_role",
            Self::InvalidHeader { .. } => "invalid_header",
            Self::TenantIdInQuery { .. } => "tenant_id_in_query",
            Self::InvalidSlug { .. } => "invalid_slug",
            Self::LastOwner => "last_owner",
            Self::NotFound { .. } => "not_found",
            Self::NoActiveScope => "no_active_scope",
            Self::Storage(StorageError::UniqueViolation { .. }) => "unique_violation",
            Self::Storage(StorageError::VersionConflict { .. }) => "version_conflict",
            Self::Storage(StorageError::DuplicateId { .. }) => "duplicate_id",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TenantContext { .. }
            | Self::InvalidHeader { .. }
            | Self::TenantIdInQuery { .. }
            | Self::InvalidSlug { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::NotMember | Self::InactiveMembership { .. } | Self::InsufficientRole { .. } => {
                StatusCode::FORBIDDEN
            }
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::LastOwner
            | Self::Storage(
                StorageError::UniqueViolation { .. }
                | StorageError::VersionConflict { .. }
                | StorageError::DuplicateId { .. },
            ) => StatusCode::CONFLICT,
            Self::NoActiveScope | Self::Storage(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for TenancyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
