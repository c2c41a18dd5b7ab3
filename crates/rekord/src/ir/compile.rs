//! IR → SQL rendering.
//!
//! Every function returns the SQL string with neutral `?` placeholders plus
//! the parameter vector, ordered strictly left to right across clause
//! categories: select-list parameters, then wheres, then havings. LIMIT and
//! OFFSET are inlined integers, never parameters. The per-dialect
//! placeholder rewrite happens in the driver adapter, not here.

use super::{Having, Join, JoinKind, Predicate, SelectIr};
use crate::value::Attributes;
use serde_json::Value;

/// Render a full SELECT.
pub fn select(ir: &SelectIr) -> (String, Vec<Value>) {
    let mut sql = String::from("SELECT ");
    if ir.distinct {
        sql.push_str("DISTINCT ");
    }
    sql.push_str(&ir.columns.join(", "));
    sql.push_str(" FROM ");
    sql.push_str(&ir.table);

    let mut params = ir.column_params.clone();
    push_joins(&mut sql, &ir.joins);
    push_wheres(&mut sql, &mut params, &ir.wheres);

    if !ir.group_bys.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&ir.group_bys.join(", "));
    }
    push_havings(&mut sql, &mut params, &ir.havings);

    if !ir.orders.is_empty() {
        sql.push_str(" ORDER BY ");
        let terms: Vec<String> = ir
            .orders
            .iter()
            .map(|o| format!("{} {}", o.column, o.direction.keyword()))
            .collect();
        sql.push_str(&terms.join(", "));
    }
    if let Some(limit) = ir.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = ir.offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }
    (sql, params)
}

/// Render `SELECT COUNT(*) AS aggregate` over the IR's joins and wheres,
/// ignoring select list, orders, limit and offset.
pub fn count(ir: &SelectIr) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT COUNT(*) AS aggregate FROM {}", ir.table);
    let mut params = Vec::new();
    push_joins(&mut sql, &ir.joins);
    push_wheres(&mut sql, &mut params, &ir.wheres);
    (sql, params)
}

/// Render a row-presence probe: `SELECT 1 … LIMIT 1`.
pub fn exists(ir: &SelectIr) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT 1 FROM {}", ir.table);
    let mut params = Vec::new();
    push_joins(&mut sql, &ir.joins);
    push_wheres(&mut sql, &mut params, &ir.wheres);
    sql.push_str(" LIMIT 1");
    (sql, params)
}

/// Render a single- or multi-row INSERT.
///
/// Columns come from the first row; later rows emit their values in that
/// column order, with absent keys as NULL parameters.
pub fn insert(table: &str, rows: &[Attributes]) -> (String, Vec<Value>) {
    let columns: Vec<&String> = rows.first().map(|r| r.keys().collect()).unwrap_or_default();
    let mut sql = format!("INSERT INTO {table} (");
    sql.push_str(
        &columns
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    );
    sql.push_str(") VALUES ");

    let placeholder_row = format!("({})", vec!["?"; columns.len()].join(", "));
    let mut params = Vec::with_capacity(columns.len() * rows.len());
    let groups: Vec<&str> = rows.iter().map(|_| placeholder_row.as_str()).collect();
    sql.push_str(&groups.join(", "));
    for row in rows {
        for col in &columns {
            params.push(row.get(col.as_str()).cloned().unwrap_or(Value::Null));
        }
    }
    (sql, params)
}

/// Render an UPDATE; set parameters precede where parameters.
pub fn update(table: &str, attrs: &Attributes, wheres: &[Predicate]) -> (String, Vec<Value>) {
    let mut sql = format!("UPDATE {table} SET ");
    let sets: Vec<String> = attrs.keys().map(|k| format!("{k} = ?")).collect();
    sql.push_str(&sets.join(", "));
    let mut params: Vec<Value> = attrs.values().cloned().collect();
    push_wheres(&mut sql, &mut params, wheres);
    (sql, params)
}

/// Render a DELETE.
pub fn delete(table: &str, wheres: &[Predicate]) -> (String, Vec<Value>) {
    let mut sql = format!("DELETE FROM {table}");
    let mut params = Vec::new();
    push_wheres(&mut sql, &mut params, wheres);
    (sql, params)
}

/// Render an atomic increment/decrement: `SET col = col ± ?`.
///
/// The column reference on the right-hand side is an identifier, not a
/// parameter, which keeps the statement atomic under concurrent updaters.
pub fn increment(
    table: &str,
    column: &str,
    amount: &Value,
    negative: bool,
    wheres: &[Predicate],
) -> (String, Vec<Value>) {
    let op = if negative { '-' } else { '+' };
    let mut sql = format!("UPDATE {table} SET {column} = {column} {op} ?");
    let mut params = vec![amount.clone()];
    push_wheres(&mut sql, &mut params, wheres);
    (sql, params)
}

fn push_joins(sql: &mut String, joins: &[Join]) {
    for join in joins {
        let kw = match join.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        sql.push_str(&format!(
            " {kw} {} ON {} {} {}",
            join.table, join.left_col, join.op, join.right_col
        ));
    }
}

pub(crate) fn push_wheres(sql: &mut String, params: &mut Vec<Value>, wheres: &[Predicate]) {
    for (i, pred) in wheres.iter().enumerate() {
        if i == 0 {
            sql.push_str(" WHERE ");
        } else {
            sql.push(' ');
            sql.push_str(pred.connector().keyword());
            sql.push(' ');
        }
        push_predicate(sql, params, pred);
    }
}

fn push_predicate(sql: &mut String, params: &mut Vec<Value>, pred: &Predicate) {
    match pred {
        Predicate::Basic {
            column, op, value, ..
        } => {
            sql.push_str(&format!("{column} {op} ?"));
            params.push(value.clone());
        }
        Predicate::In { column, values, .. } => {
            if values.is_empty() {
                // no value can match an empty list
                sql.push_str("1 = 0");
            } else {
                sql.push_str(&format!(
                    "{column} IN ({})",
                    vec!["?"; values.len()].join(", ")
                ));
                params.extend(values.iter().cloned());
            }
        }
        Predicate::NotIn { column, values, .. } => {
            if values.is_empty() {
                sql.push_str("1 = 1");
            } else {
                sql.push_str(&format!(
                    "{column} NOT IN ({})",
                    vec!["?"; values.len()].join(", ")
                ));
                params.extend(values.iter().cloned());
            }
        }
        Predicate::IsNull { column, .. } => {
            sql.push_str(&format!("{column} IS NULL"));
        }
        Predicate::IsNotNull { column, .. } => {
            sql.push_str(&format!("{column} IS NOT NULL"));
        }
        Predicate::Between {
            column, low, high, ..
        } => {
            sql.push_str(&format!("{column} BETWEEN ? AND ?"));
            params.push(low.clone());
            params.push(high.clone());
        }
        Predicate::Like {
            column, pattern, ..
        } => {
            sql.push_str(&format!("{column} LIKE ?"));
            params.push(pattern.clone());
        }
    }
}

fn push_havings(sql: &mut String, params: &mut Vec<Value>, havings: &[Having]) {
    for (i, having) in havings.iter().enumerate() {
        sql.push_str(if i == 0 { " HAVING " } else { " AND " });
        match having {
            Having::Basic { column, op, value } => {
                sql.push_str(&format!("{column} {op} ?"));
                params.push(value.clone());
            }
            Having::Count { column, op, value } => {
                sql.push_str(&format!("COUNT({column}) {op} ?"));
                params.push(value.clone());
            }
        }
    }
}
