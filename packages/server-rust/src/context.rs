//! Task-local store for the current [`RequestContext`].
//!
//! Each logical request runs inside a scope opened with [`scope`] (async) or
//! [`sync_scope`] (blocking code). The value lives in a `tokio` task-local,
//! so two requests multiplexed onto the same worker thread never observe
//! each other's context, even across `.await` points.
//!
//! Restoration is structural: when a scope's future completes, errors,
//! panics, or is dropped mid-flight (request cancelled), the enclosing value
//! becomes visible again. Outside every scope [`current`] returns the empty,
//! maximally restrictive default and [`set`] fails.
//!
//! Task-locals are not inherited by spawned tasks. Wrap spawned work with
//! [`in_current_context`] to carry the caller's context across.

use std::cell::RefCell;
use std::future::Future;

use tenantry_core::{ContextOverrides, RequestContext};
use uuid::Uuid;

use crate::error::TenancyError;

tokio::task_local! {
    static CONTEXT: RefCell<RequestContext>;
}

/// Restoration handle returned by [`set`].
///
/// Holds the value observed immediately before the matching `set`.
#[must_use = "pass the token to reset() to restore the previous context"]
#[derive(Debug)]
pub struct ContextToken {
    previous: RequestContext,
}

impl ContextToken {
    /// The context that [`reset`] will restore.
    #[must_use]
    pub fn previous(&self) -> &RequestContext {
        &self.previous
    }
}

/// Scope flags accepted by [`with_tenant`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeFlags {
    pub include_deleted: bool,
    pub allow_global_access: bool,
}

/// Returns the ambient context, or the empty default when no scope is active.
#[must_use]
pub fn current() -> RequestContext {
    CONTEXT.try_with(|ctx| *ctx.borrow()).unwrap_or_default()
}

/// Replaces the context of the innermost active scope.
///
/// # Errors
///
/// Returns [`TenancyError::NoActiveScope`] when called outside any scope.
pub fn set(ctx: RequestContext) -> Result<ContextToken, TenancyError> {
    CONTEXT
        .try_with(|cell| ContextToken {
            previous: cell.replace(ctx),
        })
        .map_err(|_| TenancyError::NoActiveScope)
}

/// Restores the context captured by `token`, or the empty default when no
/// token is supplied.
///
/// # Errors
///
/// Returns [`TenancyError::NoActiveScope`] when called outside any scope.
pub fn reset(token: Option<ContextToken>) -> Result<(), TenancyError> {
    let restored = token.map(|t| t.previous).unwrap_or_default();
    CONTEXT
        .try_with(|cell| {
            cell.replace(restored);
        })
        .map_err(|_| TenancyError::NoActiveScope)
}

/// Derives a new value from the current context. The ambient value is not changed.
#[must_use]
pub fn derive(overrides: ContextOverrides) -> RequestContext {
    current().derive(overrides)
}

/// Runs `body` with `ctx` installed as the current context.
pub async fn scope<F: Future>(ctx: RequestContext, body: F) -> F::Output {
    CONTEXT.scope(RefCell::new(ctx), body).await
}

/// Blocking counterpart of [`scope`].
pub fn sync_scope<R>(ctx: RequestContext, body: impl FnOnce() -> R) -> R {
    CONTEXT.sync_scope(RefCell::new(ctx), body)
}

/// Runs `body` as `actor_id` inside `tenant_id`.
pub async fn with_tenant<F: Future>(
    tenant_id: Option<Uuid>,
    actor_id: Option<Uuid>,
    flags: ScopeFlags,
    body: F,
) -> F::Output {
    let ctx = RequestContext {
        tenant_id,
        actor_id,
        include_deleted: flags.include_deleted,
        allow_global_access: flags.allow_global_access,
    };
    scope(ctx, body).await
}

/// Runs `body` with soft-deleted rows visible, keeping every other field of
/// the current context.
pub async fn with_include_deleted<F: Future>(body: F) -> F::Output {
    let ctx = derive(ContextOverrides::default().include_deleted(true));
    scope(ctx, body).await
}

/// Runs `body` with tenant isolation bypassed and no tenant set.
pub async fn with_system_access<F: Future>(
    actor_id: Option<Uuid>,
    include_deleted: bool,
    body: F,
) -> F::Output {
    tracing::debug!(actor_id = ?actor_id, include_deleted, "entering system access scope");
    scope(RequestContext::system(actor_id, include_deleted), body).await
}

/// Captures the caller's context so `body` sees it when polled on another task.
pub fn in_current_context<F: Future>(body: F) -> impl Future<Output = F::Output> {
    let ctx = current();
    scope(ctx, body)
}
