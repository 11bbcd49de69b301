//! Query execution against a [`StorageEngine`].
//!
//! Evaluates a [`Select`] tree exactly as given: filters, semi-joins, and
//! nested subqueries. Tenant and soft-delete restrictions are not applied
//! here; read interceptors add them to the tree before it reaches
//! [`execute`].

use tenantry_core::{Predicate, Select, Value};

use super::engine::StorageEngine;
use super::row::Row;

/// Runs `select` and returns matching base rows ordered by id.
#[must_use]
pub fn execute(engine: &dyn StorageEngine, select: &Select) -> Vec<Row> {
    let filter = select.filter.as_ref().map(|p| resolve(engine, p));
    let joins: Vec<(&str, Vec<Value>)> = select
        .joins
        .iter()
        .map(|join| {
            let mut inner = Select::table(join.table);
            inner.filter.clone_from(&join.filter);
            (
                join.left_column.as_str(),
                project(engine, &inner, &join.right_column),
            )
        })
        .collect();

    let matches = engine.scan(select.table.name).into_iter().filter(|row| {
        filter.as_ref().is_none_or(|p| matches(row, p))
            && joins
                .iter()
                .all(|(left, values)| column_in(row, left, values))
    });

    match select.limit {
        Some(limit) => matches.take(limit).collect(),
        None => matches.collect(),
    }
}

/// Values of `column` across every row returned by `select`.
fn project(engine: &dyn StorageEngine, select: &Select, column: &str) -> Vec<Value> {
    execute(engine, select)
        .iter()
        .filter_map(|row| row.column(column))
        .filter(|v| !v.is_null())
        .collect()
}

/// Replaces every `InSelect` with an `In` over the subquery's results, so
/// each subquery runs once per execution rather than once per row.
fn resolve(engine: &dyn StorageEngine, predicate: &Predicate) -> Predicate {
    match predicate {
        Predicate::And(items) => Predicate::And(items.iter().map(|p| resolve(engine, p)).collect()),
        Predicate::Or(items) => Predicate::Or(items.iter().map(|p| resolve(engine, p)).collect()),
        Predicate::Not(inner) => Predicate::Not(Box::new(resolve(engine, inner))),
        Predicate::InSelect {
            column,
            target,
            select,
        } => Predicate::In(column.clone(), project(engine, select, target)),
        other => other.clone(),
    }
}

fn column_in(row: &Row, column: &str, values: &[Value]) -> bool {
    row.column(column)
        .is_some_and(|v| !v.is_null() && values.contains(&v))
}

/// Null never equals anything, including null; use `IsNull` for that.
fn matches(row: &Row, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Eq(column, value) => {
            !value.is_null() && row.column(column).as_ref() == Some(value)
        }
        Predicate::Ne(column, value) => row
            .column(column)
            .is_some_and(|v| !v.is_null() && !value.is_null() && &v != value),
        Predicate::In(column, values) => column_in(row, column, values),
        Predicate::IsNull(column) => row.column(column).is_none_or(|v| v.is_null()),
        Predicate::IsNotNull(column) => row.column(column).is_some_and(|v| !v.is_null()),
        Predicate::And(items) => items.iter().all(|p| matches(row, p)),
        Predicate::Or(items) => items.iter().any(|p| matches(row, p)),
        Predicate::Not(inner) => !matches(row, inner),
        // Only reachable if a caller skips `resolve`.
        Predicate::InSelect { .. } => false,
    }
}
