//! Read interceptor that scopes every query to the request's tenant.

use tenantry_core::entity::columns;
use tenantry_core::{Predicate, RequestContext, Select, TableDescriptor};

use crate::error::TenancyError;
use crate::storage::ReadInterceptor;

/// Adds `tenant_id = <context tenant>` to every tenant-scoped table a query
/// touches, and `deleted_at IS NULL` to every soft-deletable one.
///
/// Applies to the base table, to every joined table, and to every
/// `InSelect` subquery at any depth. A tenant-scoped read with no tenant in
/// context and no global access fails with [`TenancyError::TenantContext`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TenantFilter;

impl TenantFilter {
    fn scope_select(ctx: &RequestContext, select: &mut Select) -> Result<(), TenancyError> {
        if let Some(filter) = select.filter.as_mut() {
            for sub in filter.subqueries_mut() {
                Self::scope_select(ctx, sub)?;
            }
        }
        if let Some(restriction) = restriction(ctx, &select.table)? {
            select.add_filter(restriction);
        }

        for join in &mut select.joins {
            if let Some(filter) = join.filter.as_mut() {
                for sub in filter.subqueries_mut() {
                    Self::scope_select(ctx, sub)?;
                }
            }
            if let Some(restriction) = restriction(ctx, &join.table)? {
                join.add_filter(restriction);
            }
        }
        Ok(())
    }
}

/// Predicate restricting `table` under `ctx`, if any.
fn restriction(
    ctx: &RequestContext,
    table: &TableDescriptor,
) -> Result<Option<Predicate>, TenancyError> {
    let mut predicates = Vec::new();

    if table.tenant_scoped && !ctx.allow_global_access {
        let Some(tenant_id) = ctx.tenant_id else {
            tracing::warn!(table = table.name, "tenant-scoped read without tenant context");
            return Err(TenancyError::tenant_context(format!(
                "reading {} requires a tenant in the request context",
                table.name
            )));
        };
        predicates.push(Predicate::eq(columns::TENANT_ID, tenant_id));
    }
    if table.soft_delete && !ctx.include_deleted {
        predicates.push(Predicate::is_null(columns::DELETED_AT));
    }

    Ok(predicates.into_iter().reduce(Predicate::and))
}

impl ReadInterceptor for TenantFilter {
    fn before_read(&self, ctx: &RequestContext, select: &mut Select) -> Result<(), TenancyError> {
        Self::scope_select(ctx, select)?;
        tracing::debug!(
            table = select.table.name,
            tenant_id = ?ctx.tenant_id,
            global = ctx.allow_global_access,
            include_deleted = ctx.include_deleted,
            "scoped select"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tenantry_core::{Join, Tenant, TenantMember, Value};
    use uuid::Uuid;

    use super::*;

    fn scoped(ctx: &RequestContext, mut select: Select) -> Result<Select, TenancyError> {
        TenantFilter.before_read(ctx, &mut select)?;
        Ok(select)
    }

    #[test]
    fn tenant_scoped_read_without_tenant_fails_closed() {
        let err = scoped(&RequestContext::default(), Select::from::<TenantMember>()).unwrap_err();
        assert!(matches!(err, TenancyError::TenantContext { .. }));
    }

    #[test]
    fn non_tenant_table_only_gets_soft_delete_filter() {
        let select = scoped(&RequestContext::default(), Select::from::<Tenant>()).unwrap();
        assert_eq!(select.filter, Some(Predicate::is_null("deleted_at")));

        let ctx = RequestContext::default().derive(
            tenantry_core::ContextOverrides::default().include_deleted(true),
        );
        let select = scoped(&ctx, Select::from::<Tenant>()).unwrap();
        assert_eq!(select.filter, None);
    }

    #[test]
    fn tenant_and_soft_delete_predicates_are_appended() {
        let tenant = Uuid::new_v4();
        let ctx = RequestContext::for_tenant(Some(tenant), None);
        let select = scoped(
            &ctx,
            Select::from::<TenantMember>().filter(Predicate::eq("role", "owner")),
        )
        .unwrap();
        assert_eq!(
            select.filter,
            Some(Predicate::And(vec![
                Predicate::eq("role", "owner"),
                Predicate::Eq("tenant_id".into(), Value::from(tenant)),
                Predicate::is_null("deleted_at"),
            ]))
        );
    }

    #[test]
    fn global_access_skips_tenant_predicate() {
        let select = scoped(
            &RequestContext::system(None, false),
            Select::from::<TenantMember>(),
        )
        .unwrap();
        assert_eq!(select.filter, Some(Predicate::is_null("deleted_at")));
    }

    #[test]
    fn joins_and_nested_subqueries_are_constrained() {
        let tenant = Uuid::new_v4();
        let ctx = RequestContext::for_tenant(Some(tenant), None);
        let nested = Select::from::<TenantMember>().filter(Predicate::Not(Box::new(
            Predicate::in_select("user_id", "user_id", Select::from::<TenantMember>()),
        )));
        let select = Select::from::<Tenant>()
            .filter(Predicate::in_select("id", "tenant_id", nested))
            .join(Join::on::<TenantMember>("id", "tenant_id"));

        let mut select = scoped(&ctx, select).unwrap();

        let tenant_pred = Predicate::eq("tenant_id", tenant);
        let contains = |p: &Option<Predicate>| match p {
            Some(Predicate::And(items)) => items.contains(&tenant_pred),
            _ => false,
        };
        assert!(contains(&select.joins[0].filter));

        let filter = select.filter.as_mut().unwrap();
        let subs = filter.subqueries_mut();
        assert_eq!(subs.len(), 1);
        assert!(contains(&subs[0].filter));
        let inner = subs.into_iter().next().unwrap();
        let deepest = inner.filter.as_mut().unwrap().subqueries_mut();
        assert_eq!(deepest.len(), 1);
        assert!(contains(&deepest[0].filter));
    }

    #[test]
    fn subquery_without_tenant_fails_even_under_non_tenant_base() {
        let select = Select::from::<Tenant>().filter(Predicate::in_select(
            "id",
            "tenant_id",
            Select::from::<TenantMember>(),
        ));
        let err = scoped(&RequestContext::default(), select).unwrap_err();
        assert!(matches!(err, TenancyError::TenantContext { .. }));
    }
}
