//! Fluent query builder bound to an entity type.
//!
//! Chainable methods accumulate the statement IR in call order; terminals
//! (in [`exec`]) compile it, run it on the type's connection and hydrate
//! entities. Relational filters and count annotations live in
//! [`relational`].

mod exec;
mod relational;


pub use exec::PageResult;

use crate::ir::{Connector, Direction, Having, Join, JoinKind, Order, Predicate, SelectIr};
use crate::relation::eager::Constraint;
use crate::schema::EntityType;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct Builder {
    model: Arc<EntityType>,
    ir: SelectIr,
    eager: Vec<(String, Option<Constraint>)>,
    with_counts: Vec<String>,
    reveal_hidden: bool,
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("model", &self.model)
            .field("ir", &self.ir)
            .field("with_counts", &self.with_counts)
            .field("reveal_hidden", &self.reveal_hidden)
            .finish_non_exhaustive()
    }
}

impl Builder {
    /// A fresh builder over the type's table.
    pub fn new(model: Arc<EntityType>) -> Self {
        let ir = SelectIr::new(model.table());
        Self {
            model,
            ir,
            eager: Vec::new(),
            with_counts: Vec::new(),
            reveal_hidden: false,
        }
    }

    pub(crate) fn model(&self) -> &Arc<EntityType> {
        &self.model
    }

    pub(crate) fn ir(&self) -> &SelectIr {
        &self.ir
    }

    pub(crate) fn ir_mut(&mut self) -> &mut SelectIr {
        &mut self.ir
    }

    // ==================== Selection ====================

    /// Replace the select list.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.ir.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Append one select column (raw expressions allowed).
    pub fn add_select(mut self, column: &str) -> Self {
        if self.ir.columns.len() == 1 && self.ir.columns[0] == "*" {
            self.ir.columns[0] = column.to_string();
        } else {
            self.ir.columns.push(column.to_string());
        }
        self
    }

    pub fn distinct(mut self) -> Self {
        self.ir.distinct = true;
        self
    }

    // ==================== Filtering ====================

    /// Add `column op ?` joined with AND.
    pub fn where_(mut self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        self.ir.wheres.push(Predicate::Basic {
            column: column.to_string(),
            op: op.to_string(),
            value: value.into(),
            connector: Connector::And,
        });
        self
    }

    /// Add `column op ?` joined with OR.
    pub fn or_where(mut self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        self.ir.wheres.push(Predicate::Basic {
            column: column.to_string(),
            op: op.to_string(),
            value: value.into(),
            connector: Connector::Or,
        });
        self
    }

    pub fn where_in(mut self, column: &str, values: Vec<Value>) -> Self {
        self.ir.wheres.push(Predicate::In {
            column: column.to_string(),
            values,
            connector: Connector::And,
        });
        self
    }

    pub fn where_not_in(mut self, column: &str, values: Vec<Value>) -> Self {
        self.ir.wheres.push(Predicate::NotIn {
            column: column.to_string(),
            values,
            connector: Connector::And,
        });
        self
    }

    pub fn where_null(mut self, column: &str) -> Self {
        self.ir.wheres.push(Predicate::IsNull {
            column: column.to_string(),
            connector: Connector::And,
        });
        self
    }

    pub fn where_not_null(mut self, column: &str) -> Self {
        self.ir.wheres.push(Predicate::IsNotNull {
            column: column.to_string(),
            connector: Connector::And,
        });
        self
    }

    pub fn where_between(
        mut self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.ir.wheres.push(Predicate::Between {
            column: column.to_string(),
            low: low.into(),
            high: high.into(),
            connector: Connector::And,
        });
        self
    }

    pub fn where_like(mut self, column: &str, pattern: impl Into<Value>) -> Self {
        self.ir.wheres.push(Predicate::Like {
            column: column.to_string(),
            pattern: pattern.into(),
            connector: Connector::And,
        });
        self
    }

    // ==================== Ordering and paging ====================

    /// `direction` is `"asc"` or `"desc"`, case-insensitive.
    pub fn order_by(mut self, column: &str, direction: &str) -> Self {
        self.ir.orders.push(Order {
            column: column.to_string(),
            direction: Direction::parse(direction),
        });
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.ir.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.ir.offset = Some(n);
        self
    }

    /// Alias for [`Builder::offset`].
    pub fn skip(self, n: u64) -> Self {
        self.offset(n)
    }

    /// Alias for [`Builder::limit`].
    pub fn take(self, n: u64) -> Self {
        self.limit(n)
    }

    // ==================== Grouping ====================

    pub fn group_by(mut self, column: &str) -> Self {
        self.ir.group_bys.push(column.to_string());
        self
    }

    pub fn having(mut self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        self.ir.havings.push(Having::Basic {
            column: column.to_string(),
            op: op.to_string(),
            value: value.into(),
        });
        self
    }

    /// `HAVING COUNT(column) op ?`; pass `*` to count rows.
    pub fn having_count(mut self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        self.ir.havings.push(Having::Count {
            column: column.to_string(),
            op: op.to_string(),
            value: value.into(),
        });
        self
    }

    // ==================== Joins ====================

    pub fn join(mut self, table: &str, left_col: &str, op: &str, right_col: &str) -> Self {
        self.ir.joins.push(Join {
            kind: JoinKind::Inner,
            table: table.to_string(),
            left_col: left_col.to_string(),
            op: op.to_string(),
            right_col: right_col.to_string(),
        });
        self
    }

    pub fn left_join(mut self, table: &str, left_col: &str, op: &str, right_col: &str) -> Self {
        self.ir.joins.push(Join {
            kind: JoinKind::Left,
            table: table.to_string(),
            left_col: left_col.to_string(),
            op: op.to_string(),
            right_col: right_col.to_string(),
        });
        self
    }

    // ==================== Eager loading declarations ====================

    /// Declare a relation (or dot path) to eager-load after `get`.
    pub fn with(mut self, path: &str) -> Self {
        self.eager.push((path.to_string(), None));
        self
    }

    /// Declare a relation path with a constraint applied at the leaf.
    pub fn with_constrained<F>(mut self, path: &str, constraint: F) -> Self
    where
        F: Fn(Builder) -> Builder + Send + Sync + 'static,
    {
        self.eager
            .push((path.to_string(), Some(Arc::new(constraint))));
        self
    }

    /// Annotate results with `<name>_count` scalar subquery columns.
    pub fn with_count(mut self, name: &str) -> Self {
        self.with_counts.push(name.to_string());
        self
    }

    pub fn with_counts(mut self, names: &[&str]) -> Self {
        self.with_counts.extend(names.iter().map(|n| n.to_string()));
        self
    }

    // ==================== Hidden projection ====================

    /// Hydrated entities reveal their hidden attributes.
    pub fn with_hidden(mut self) -> Self {
        self.reveal_hidden = true;
        self
    }

    /// Explicitly set the hidden projection; `false` (the default) strips
    /// hidden attributes.
    pub fn without_hidden(mut self, show: bool) -> Self {
        self.reveal_hidden = show;
        self
    }

    pub(crate) fn reveal_hidden_flag(&self) -> bool {
        self.reveal_hidden
    }

    pub(crate) fn take_parts(
        self,
    ) -> (
        Arc<EntityType>,
        SelectIr,
        Vec<(String, Option<Constraint>)>,
        Vec<String>,
        bool,
    ) {
        (
            self.model,
            self.ir,
            self.eager,
            self.with_counts,
            self.reveal_hidden,
        )
    }
}
