//! Neutral statement representation.
//!
//! A [`SelectIr`] is an immutable-by-convention description of a SELECT that
//! the fluent builder accumulates and [`compile`] renders to SQL plus a
//! parameter vector. Write statements (INSERT/UPDATE/DELETE, increment) are
//! compiled directly from their inputs and reuse the same WHERE machinery.
//!
//! Two rules hold everywhere: a parameter value is always emitted as a `?`
//! placeholder, never inlined, and identifiers (tables, columns) are emitted
//! verbatim — they are trusted caller input.

pub mod compile;

#[cfg(test)]
mod tests;

use serde_json::Value;

/// Join kinds supported by the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// One join clause; emission preserves insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub left_col: String,
    pub op: String,
    pub right_col: String,
}

/// Boolean connector between consecutive predicates. The first predicate's
/// connector is ignored in emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

impl Connector {
    fn keyword(self) -> &'static str {
        match self {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

/// The exclusive set of WHERE predicate variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Basic {
        column: String,
        op: String,
        value: Value,
        connector: Connector,
    },
    In {
        column: String,
        values: Vec<Value>,
        connector: Connector,
    },
    NotIn {
        column: String,
        values: Vec<Value>,
        connector: Connector,
    },
    IsNull {
        column: String,
        connector: Connector,
    },
    IsNotNull {
        column: String,
        connector: Connector,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
        connector: Connector,
    },
    Like {
        column: String,
        pattern: Value,
        connector: Connector,
    },
}

impl Predicate {
    pub(crate) fn connector(&self) -> Connector {
        match self {
            Predicate::Basic { connector, .. }
            | Predicate::In { connector, .. }
            | Predicate::NotIn { connector, .. }
            | Predicate::IsNull { connector, .. }
            | Predicate::IsNotNull { connector, .. }
            | Predicate::Between { connector, .. }
            | Predicate::Like { connector, .. } => *connector,
        }
    }

    /// Column name the predicate constrains, for prefixing in relational
    /// filters.
    pub(crate) fn column_mut(&mut self) -> &mut String {
        match self {
            Predicate::Basic { column, .. }
            | Predicate::In { column, .. }
            | Predicate::NotIn { column, .. }
            | Predicate::IsNull { column, .. }
            | Predicate::IsNotNull { column, .. }
            | Predicate::Between { column, .. }
            | Predicate::Like { column, .. } => column,
        }
    }

    /// Number of `?` placeholders this predicate contributes.
    pub fn param_count(&self) -> usize {
        match self {
            Predicate::Basic { .. } | Predicate::Like { .. } => 1,
            Predicate::In { values, .. } | Predicate::NotIn { values, .. } => values.len(),
            Predicate::IsNull { .. } | Predicate::IsNotNull { .. } => 0,
            Predicate::Between { .. } => 2,
        }
    }
}

/// HAVING clause variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Having {
    Basic {
        column: String,
        op: String,
        value: Value,
    },
    /// `COUNT(col) op ?`; column `*` counts rows.
    Count {
        column: String,
        op: String,
        value: Value,
    },
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// Parse `"asc"` / `"desc"` case-insensitively, defaulting to ascending.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("desc") {
            Direction::Desc
        } else {
            Direction::Asc
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Accumulated description of a SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectIr {
    pub table: String,
    /// Select list; defaults to `["*"]`. Entries may be raw scalar
    /// subqueries (e.g. `(SELECT COUNT(*) …) AS posts_count`).
    pub columns: Vec<String>,
    /// Parameters bound by `?` placeholders inside raw select-list entries.
    /// The select list precedes every other clause, so these come first in
    /// the compiled parameter vector.
    pub column_params: Vec<Value>,
    pub distinct: bool,
    pub joins: Vec<Join>,
    pub wheres: Vec<Predicate>,
    pub group_bys: Vec<String>,
    pub havings: Vec<Having>,
    pub orders: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectIr {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: vec!["*".to_string()],
            column_params: Vec::new(),
            distinct: false,
            joins: Vec::new(),
            wheres: Vec::new(),
            group_bys: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Total `?` count contributed by the WHERE clause.
    pub fn where_param_count(&self) -> usize {
        self.wheres.iter().map(Predicate::param_count).sum()
    }
}
