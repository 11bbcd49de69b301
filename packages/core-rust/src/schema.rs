//! Query AST understood by the data-mapping layer.
//!
//! A [`Select`] reads rows of one base table. It may be narrowed by a
//! [`Predicate`] tree, by semi-[`Join`]s against other tables, and by
//! `InSelect` subqueries nested anywhere inside a predicate. Read
//! interceptors rewrite this tree before execution, so every table a query
//! touches is reachable from the root `Select`.

use crate::entity::{Entity, TableDescriptor};
use crate::types::Value;

/// Row-level filter expression. Column names refer to the table the
/// predicate is attached to.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    /// Column is missing or null.
    IsNull(String),
    IsNotNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// `column IN (SELECT target FROM ...)`.
    InSelect {
        column: String,
        target: String,
        select: Box<Select>,
    },
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne(column.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    pub fn in_select(column: impl Into<String>, target: impl Into<String>, select: Select) -> Self {
        Self::InSelect {
            column: column.into(),
            target: target.into(),
            select: Box::new(select),
        }
    }

    /// Conjunction that flattens nested `And`s.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), right) => {
                left.push(right);
                Self::And(left)
            }
            (left, Self::And(mut right)) => {
                right.insert(0, left);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }

    /// Mutable references to every subquery nested in this predicate.
    pub fn subqueries_mut(&mut self) -> Vec<&mut Select> {
        let mut out = Vec::new();
        self.collect_subqueries(&mut out);
        out
    }

    fn collect_subqueries<'a>(&'a mut self, out: &mut Vec<&'a mut Select>) {
        match self {
            Self::And(items) | Self::Or(items) => {
                for item in items {
                    item.collect_subqueries(out);
                }
            }
            Self::Not(inner) => (**inner).collect_subqueries(out),
            Self::InSelect { select, .. } => out.push(&mut **select),
            Self::Eq(..)
            | Self::Ne(..)
            | Self::In(..)
            | Self::IsNull(_)
            | Self::IsNotNull(_) => {}
        }
    }
}

/// Semi-join: a base row is kept only if at least one row of `table` has
/// `right_column == base.left_column` and satisfies `filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: TableDescriptor,
    pub left_column: String,
    pub right_column: String,
    pub filter: Option<Predicate>,
}

impl Join {
    /// Joins the entity's table on `base.left_column == joined.right_column`.
    pub fn on<T: Entity>(left_column: impl Into<String>, right_column: impl Into<String>) -> Self {
        Self {
            table: T::TABLE,
            left_column: left_column.into(),
            right_column: right_column.into(),
            filter: None,
        }
    }

    /// Adds a filter on the joined rows (ANDed with any existing one).
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.add_filter(predicate);
        self
    }

    pub fn add_filter(&mut self, predicate: Predicate) {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
    }
}

/// A read of one base table.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: TableDescriptor,
    pub filter: Option<Predicate>,
    pub joins: Vec<Join>,
    pub limit: Option<usize>,
}

impl Select {
    /// Selects every row of the entity's table.
    #[must_use]
    pub fn from<T: Entity>() -> Self {
        Self::table(T::TABLE)
    }

    #[must_use]
    pub fn table(table: TableDescriptor) -> Self {
        Self {
            table,
            filter: None,
            joins: Vec::new(),
            limit: None,
        }
    }

    /// Adds a filter on base rows (ANDed with any existing one).
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.add_filter(predicate);
        self
    }

    pub fn add_filter(&mut self, predicate: Predicate) {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
    }

    #[must_use]
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Tenant, TenantMember};

    #[test]
    fn and_flattens_nested_conjunctions() {
        let p = Predicate::eq("a", 1_i64)
            .and(Predicate::eq("b", 2_i64))
            .and(Predicate::eq("c", 3_i64).and(Predicate::eq("d", 4_i64)));
        let Predicate::And(items) = p else {
            panic!("expected And");
        };
        assert_eq!(items.len(), 4);
    }

    #[test]
    fn repeated_filters_are_anded() {
        let select = Select::from::<TenantMember>()
            .filter(Predicate::eq("role", "owner"))
            .filter(Predicate::is_null("deleted_at"));
        assert_eq!(
            select.filter,
            Some(Predicate::And(vec![
                Predicate::eq("role", "owner"),
                Predicate::is_null("deleted_at"),
            ]))
        );
    }

    #[test]
    fn subqueries_are_found_at_any_depth() {
        let inner = Select::from::<Tenant>();
        let mut predicate = Predicate::Or(vec![
            Predicate::eq("role", "owner"),
            Predicate::Not(Box::new(Predicate::in_select("tenant_id", "id", inner.clone()))),
            Predicate::And(vec![Predicate::in_select("tenant_id", "id", inner)]),
        ]);
        let subs = predicate.subqueries_mut();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.table.name == "tenants"));
    }

    #[test]
    fn join_targets_entity_table() {
        let join = Join::on::<Tenant>("tenant_id", "id").filter(Predicate::eq("status", "active"));
        assert_eq!(join.table, Tenant::TABLE);
        assert!(join.filter.is_some());
    }
}
