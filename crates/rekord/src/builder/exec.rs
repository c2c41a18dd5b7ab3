//! Builder terminals: compile, execute, hydrate.

use super::Builder;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::ir::compile;
use crate::relation::eager;
use crate::value::{now, Attributes};
use serde_json::Value;

/// Pagination result.
#[derive(Debug, serde::Serialize)]
pub struct PageResult {
    pub data: Vec<Entity>,
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
    pub from: Option<u64>,
    pub to: u64,
}

impl PageResult {
    /// JSON projection with the canonical field names.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "data": self.data.iter().map(Entity::to_json).collect::<Vec<_>>(),
            "total": self.total,
            "per_page": self.per_page,
            "current_page": self.current_page,
            "last_page": self.last_page,
            "from": self.from,
            "to": self.to,
        })
    }
}

impl Builder {
    /// Run the accumulated SELECT and hydrate entities; eager-load
    /// declarations run afterwards, in declaration order.
    pub async fn get(self) -> Result<Vec<Entity>> {
        let (model, mut ir, eager_specs, with_counts, reveal_hidden) = self.take_parts();
        for name in &with_counts {
            let relation = model.relation(name)?;
            let (column, params) = super::relational::count_subquery(&model, name, &relation)?;
            if ir.columns.len() == 1 && ir.columns[0] == "*" {
                ir.columns = vec!["*".to_string(), column];
            } else {
                ir.columns.push(column);
            }
            ir.column_params.extend(params);
        }
        let driver = model.connection()?;
        let (sql, params) = compile::select(&ir);
        let rows = driver.query(&sql, &params).await?;
        let mut entities: Vec<Entity> = rows
            .into_iter()
            .map(|row| Entity::hydrate(model.clone(), row, reveal_hidden))
            .collect();
        if !eager_specs.is_empty() {
            let tree = eager::build_tree(&eager_specs);
            eager::load_slice(&mut entities, &tree).await?;
        }
        Ok(entities)
    }

    /// First row or `None`.
    pub async fn first(self) -> Result<Option<Entity>> {
        Ok(self.limit(1).get().await?.into_iter().next())
    }

    /// First row or [`Error::NotFound`].
    pub async fn first_or_fail(self) -> Result<Entity> {
        let table = self.model().table().to_string();
        self.first()
            .await?
            .ok_or_else(|| Error::not_found(format!("no matching row in '{table}'")))
    }

    /// `SELECT COUNT(*)` over the accumulated joins and wheres; orders,
    /// limit and offset are ignored.
    pub async fn count(self) -> Result<u64> {
        let driver = self.model().connection()?;
        let (sql, params) = compile::count(self.ir());
        let rows = driver.query(&sql, &params).await?;
        let value = rows
            .first()
            .and_then(|row| row.get("aggregate"))
            .cloned()
            .unwrap_or(Value::Null);
        aggregate_to_u64(&value)
    }

    /// Row-presence probe.
    pub async fn exists(self) -> Result<bool> {
        let driver = self.model().connection()?;
        let (sql, params) = compile::exists(self.ir());
        Ok(!driver.query(&sql, &params).await?.is_empty())
    }

    /// Count, then fetch one page. `page` is 1-based; both arguments clamp
    /// to at least 1.
    pub async fn paginate(self, page: u64, per_page: u64) -> Result<PageResult> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let total = self.clone().count().await?;
        let offset = (page - 1) * per_page;
        let data = self.offset(offset).limit(per_page).get().await?;
        Ok(PageResult {
            total,
            per_page,
            current_page: page,
            last_page: total.div_ceil(per_page),
            from: (total > 0).then_some(offset + 1),
            to: offset + data.len() as u64,
            data,
        })
    }

    /// Insert one or many raw rows. Returns the number of inserted rows.
    pub async fn insert(self, rows: Vec<Attributes>) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let driver = self.model().connection()?;
        let (sql, params) = compile::insert(self.model().table(), &rows);
        Ok(driver.exec(&sql, &params).await?.affected)
    }

    /// Update rows matching the accumulated wheres. The caller's map is
    /// copied before `updated_at` is injected.
    pub async fn update(self, attrs: Attributes) -> Result<u64> {
        let mut attrs = attrs;
        if self.model().manages_timestamps() {
            attrs.insert("updated_at".to_string(), now());
        }
        if attrs.is_empty() {
            return Ok(0);
        }
        let driver = self.model().connection()?;
        let (sql, params) = compile::update(self.model().table(), &attrs, &self.ir().wheres);
        Ok(driver.exec(&sql, &params).await?.affected)
    }

    /// Update, then re-run the accumulated query with the given relations
    /// eagerly loaded.
    pub async fn update_and_fetch(
        self,
        attrs: Attributes,
        relations: &[&str],
    ) -> Result<Vec<Entity>> {
        let mut fetch = self.clone();
        self.update(attrs).await?;
        for name in relations {
            fetch = fetch.with(name);
        }
        fetch.get().await
    }

    /// Delete rows matching the accumulated wheres.
    pub async fn delete(self) -> Result<u64> {
        let driver = self.model().connection()?;
        let (sql, params) = compile::delete(self.model().table(), &self.ir().wheres);
        Ok(driver.exec(&sql, &params).await?.affected)
    }

    /// Atomic `SET column = column + n`.
    pub async fn increment(self, column: &str, n: i64) -> Result<u64> {
        self.increment_by(column, n, false).await
    }

    /// Atomic `SET column = column - n`.
    pub async fn decrement(self, column: &str, n: i64) -> Result<u64> {
        self.increment_by(column, n, true).await
    }

    async fn increment_by(self, column: &str, n: i64, negative: bool) -> Result<u64> {
        let driver = self.model().connection()?;
        let (sql, params) = compile::increment(
            self.model().table(),
            column,
            &Value::from(n),
            negative,
            &self.ir().wheres,
        );
        Ok(driver.exec(&sql, &params).await?.affected)
    }
}

fn aggregate_to_u64(value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().and_then(|i| u64::try_from(i).ok()))
            .ok_or_else(|| Error::query(format!("non-integral aggregate {n}"))),
        Value::String(s) => s
            .parse::<u64>()
            .map_err(|_| Error::query(format!("unparseable aggregate '{s}'"))),
        other => Err(Error::query(format!("unexpected aggregate value {other}"))),
    }
}
