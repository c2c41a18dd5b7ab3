//! belongsToMany pivot access and mutations.

use super::PivotRelation;
use crate::builder::Builder;
use crate::entity::Entity;
use crate::error::Result;
use crate::ir::compile;
use crate::ir::{Connector, Predicate, SelectIr};
use crate::relation::eager::Constraint;
use crate::value::{Attributes, key_string, now};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// A pivot relation bound to one parent: fetch plus the attach/detach
/// mutation family.
pub struct PivotAccessor {
    parent: Entity,
    relation: PivotRelation,
}

impl PivotAccessor {
    pub fn new(parent: Entity, relation: PivotRelation) -> Self {
        Self { parent, relation }
    }

    fn parent_value(&self) -> Value {
        self.parent.raw_attribute(&self.relation.parent_key)
    }

    fn pivot_wheres(&self) -> Vec<Predicate> {
        let mut wheres = vec![Predicate::Basic {
            column: self.relation.foreign_pivot_key.clone(),
            op: "=".to_string(),
            value: self.parent_value(),
            connector: Connector::And,
        }];
        for (column, op, value) in &self.relation.where_pivot {
            wheres.push(Predicate::Basic {
                column: column.clone(),
                op: op.clone(),
                value: value.clone(),
                connector: Connector::And,
            });
        }
        wheres
    }

    /// Two-step fetch: pivot rows for the parent, then the related rows,
    /// with the pivot payload attached under the relation's alias.
    pub(crate) async fn fetch_related(&self, constraint: Option<&Constraint>) -> Result<Vec<Entity>> {
        let connection = self.relation.target.connection()?;

        let mut ir = SelectIr::new(&self.relation.pivot_table);
        let mut columns = vec![self.relation.related_pivot_key.clone()];
        columns.extend(self.relation.pivot_columns.iter().cloned());
        if self.relation.pivot_timestamps {
            columns.push("created_at".to_string());
            columns.push("updated_at".to_string());
        }
        ir.columns = columns;
        ir.wheres = self.pivot_wheres();
        let (sql, params) = compile::select(&ir);
        let pivot_rows = connection.query(&sql, &params).await?;

        let related_ids: Vec<Value> = {
            let mut seen = HashSet::new();
            pivot_rows
                .iter()
                .filter_map(|row| {
                    let value = row.get(&self.relation.related_pivot_key).cloned()?;
                    key_string(&value)
                        .filter(|k| seen.insert(k.clone()))
                        .map(|_| value)
                })
                .collect()
        };
        if related_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = Builder::new(Arc::clone(&self.relation.target))
            .where_in(&self.relation.related_key, related_ids);
        if let Some(callback) = constraint {
            builder = callback(builder);
        }
        let related = builder.get().await?;
        let index: std::collections::HashMap<String, Entity> = related
            .into_iter()
            .filter_map(|row| {
                key_string(&row.raw_attribute(&self.relation.related_key)).map(|k| (k, row))
            })
            .collect();

        let mut out = Vec::with_capacity(pivot_rows.len());
        for row in &pivot_rows {
            let Some(key) = row.get(&self.relation.related_pivot_key).and_then(|v| key_string(v))
            else {
                continue;
            };
            let Some(found) = index.get(&key) else {
                continue;
            };
            let mut entity = found.clone();
            let mut payload = Attributes::new();
            for (column, value) in row {
                if column != &self.relation.related_pivot_key {
                    payload.insert(column.clone(), value.clone());
                }
            }
            entity.set_attribute(&self.relation.pivot_alias, Value::Object(payload))?;
            out.push(entity);
        }
        Ok(out)
    }

    /// Related ids currently attached to the parent.
    pub async fn attached_ids(&self) -> Result<Vec<Value>> {
        let connection = self.relation.target.connection()?;
        let mut ir = SelectIr::new(&self.relation.pivot_table);
        ir.columns = vec![self.relation.related_pivot_key.clone()];
        ir.wheres = self.pivot_wheres();
        let (sql, params) = compile::select(&ir);
        let rows = connection.query(&sql, &params).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.get(&self.relation.related_pivot_key).cloned())
            .filter(|v| !v.is_null())
            .collect())
    }

    /// Insert pivot rows for the given related ids.
    pub async fn attach(&self, ids: Vec<Value>) -> Result<()> {
        self.attach_with(ids.into_iter().map(|id| (id, Attributes::new())).collect())
            .await
    }

    /// Insert pivot rows carrying extra pivot attributes.
    pub async fn attach_with(&self, pairs: Vec<(Value, Attributes)>) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let connection = self.relation.target.connection()?;
        let parent_value = self.parent_value();
        let stamp = self.relation.pivot_timestamps.then(now);
        let rows: Vec<Attributes> = pairs
            .into_iter()
            .map(|(id, extra)| {
                let mut row = Attributes::new();
                row.insert(self.relation.foreign_pivot_key.clone(), parent_value.clone());
                row.insert(self.relation.related_pivot_key.clone(), id);
                for (key, value) in extra {
                    row.insert(key, value);
                }
                if let Some(stamp) = &stamp {
                    row.insert("created_at".to_string(), stamp.clone());
                    row.insert("updated_at".to_string(), stamp.clone());
                }
                row
            })
            .collect();
        let (sql, params) = compile::insert(&self.relation.pivot_table, &rows);
        connection.exec(&sql, &params).await?;
        Ok(())
    }

    /// Delete pivot rows for the parent; `None` detaches everything.
    pub async fn detach(&self, ids: Option<Vec<Value>>) -> Result<u64> {
        let connection = self.relation.target.connection()?;
        let mut wheres = vec![Predicate::Basic {
            column: self.relation.foreign_pivot_key.clone(),
            op: "=".to_string(),
            value: self.parent_value(),
            connector: Connector::And,
        }];
        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(0);
            }
            wheres.push(Predicate::In {
                column: self.relation.related_pivot_key.clone(),
                values: ids,
                connector: Connector::And,
            });
        }
        let (sql, params) = compile::delete(&self.relation.pivot_table, &wheres);
        Ok(connection.exec(&sql, &params).await?.affected)
    }

    /// Replace the attached set: detach everything, attach the given ids.
    pub async fn sync(&self, ids: Vec<Value>) -> Result<()> {
        self.detach(None).await?;
        self.attach(ids).await
    }

    /// Attach only the ids not already attached.
    pub async fn sync_without_detaching(&self, ids: Vec<Value>) -> Result<()> {
        let attached: HashSet<String> = self
            .attached_ids()
            .await?
            .iter()
            .filter_map(key_string)
            .collect();
        let missing: Vec<Value> = ids
            .into_iter()
            .filter(|id| key_string(id).is_none_or(|k| !attached.contains(&k)))
            .collect();
        self.attach(missing).await
    }

    /// Detach the ids currently attached, attach the rest.
    pub async fn toggle(&self, ids: Vec<Value>) -> Result<()> {
        let attached: HashSet<String> = self
            .attached_ids()
            .await?
            .iter()
            .filter_map(key_string)
            .collect();
        let (to_detach, to_attach): (Vec<Value>, Vec<Value>) = ids
            .into_iter()
            .partition(|id| key_string(id).is_some_and(|k| attached.contains(&k)));
        if !to_detach.is_empty() {
            self.detach(Some(to_detach)).await?;
        }
        self.attach(to_attach).await
    }

    /// Update the pivot row for one attached related id.
    pub async fn update_existing_pivot(&self, id: Value, mut attrs: Attributes) -> Result<u64> {
        let connection = self.relation.target.connection()?;
        if self.relation.pivot_timestamps {
            attrs.insert("updated_at".to_string(), now());
        }
        let wheres = vec![
            Predicate::Basic {
                column: self.relation.foreign_pivot_key.clone(),
                op: "=".to_string(),
                value: self.parent_value(),
                connector: Connector::And,
            },
            Predicate::Basic {
                column: self.relation.related_pivot_key.clone(),
                op: "=".to_string(),
                value: id,
                connector: Connector::And,
            },
        ];
        let (sql, params) = compile::update(&self.relation.pivot_table, &attrs, &wheres);
        Ok(connection.exec(&sql, &params).await?.affected)
    }

    /// Create a related entity and attach it.
    pub async fn create(&self, attrs: Attributes, pivot_attrs: Attributes) -> Result<Entity> {
        let mut entity = Entity::new(Arc::clone(&self.relation.target));
        entity.fill(attrs)?;
        entity.save().await?;
        let id = entity.raw_attribute(&self.relation.related_key);
        self.attach_with(vec![(id, pivot_attrs)]).await?;
        Ok(entity)
    }

    /// Create and attach several related entities.
    pub async fn create_many(&self, rows: Vec<Attributes>) -> Result<Vec<Entity>> {
        let mut out = Vec::with_capacity(rows.len());
        for attrs in rows {
            out.push(self.create(attrs, Attributes::new()).await?);
        }
        Ok(out)
    }
}
