//! Batched eager loading.
//!
//! Each relation kind loads one level for a whole batch of parents with a
//! bounded number of queries, independent of batch size: one auxiliary
//! query for the direct kinds (has, belongs-to, morph), two for pivot and
//! through traversals. Dot paths are normalized into a tree; the walker
//! loads a level across the current frontier of parents, then descends into
//! the union of the loaded entities. Constraints bind to the leaf of the
//! path they were declared on; intermediate levels load unfiltered.

use super::{
    BelongsToRelation, HasRelation, MorphRelation, MorphToRelation, PivotRelation, Related,
    Relation, ThroughRelation, default_instance,
};
use crate::builder::Builder;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::ir::compile;
use crate::ir::{Connector, Predicate, SelectIr};
use crate::schema::{EntityType, MorphMap};
use crate::value::{Attributes, key_string};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A callback mutating the related query before an eager load executes.
pub type Constraint = Arc<dyn Fn(Builder) -> Builder + Send + Sync>;

/// One segment of a normalized eager-load tree.
#[derive(Clone)]
pub struct EagerNode {
    pub name: String,
    pub constraint: Option<Constraint>,
    pub children: Vec<EagerNode>,
}

/// Merge dot paths (with optional leaf constraints) into a tree.
pub(crate) fn build_tree(specs: &[(String, Option<Constraint>)]) -> Vec<EagerNode> {
    let mut roots = Vec::new();
    for (path, constraint) in specs {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        insert_path(&mut roots, &segments, constraint.clone());
    }
    roots
}

/// Paths without constraints, as used by `Entity::load`.
pub(crate) fn parse_paths(paths: &[&str]) -> Vec<EagerNode> {
    let specs: Vec<(String, Option<Constraint>)> =
        paths.iter().map(|p| (p.to_string(), None)).collect();
    build_tree(&specs)
}

fn insert_path(nodes: &mut Vec<EagerNode>, segments: &[&str], constraint: Option<Constraint>) {
    let Some((head, tail)) = segments.split_first() else {
        return;
    };
    let pos = match nodes.iter().position(|n| n.name == *head) {
        Some(pos) => pos,
        None => {
            nodes.push(EagerNode {
                name: head.to_string(),
                constraint: None,
                children: Vec::new(),
            });
            nodes.len() - 1
        }
    };
    if tail.is_empty() {
        if constraint.is_some() {
            nodes[pos].constraint = constraint;
        }
    } else {
        insert_path(&mut nodes[pos].children, tail, constraint);
    }
}

/// Load a tree of relations onto a batch of entities.
///
/// The frontier may become heterogeneous below a `morphTo` segment; each
/// level groups entities by their type and loads per group. Recursion works
/// on owned frontiers: children are taken out of the parents' relation
/// caches, loaded, and restored in order.
pub(crate) fn load_slice<'a>(
    entities: &'a mut [Entity],
    nodes: &'a [EagerNode],
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        if entities.is_empty() {
            return Ok(());
        }
        for node in nodes {
            let mut groups: Vec<(Arc<EntityType>, Vec<usize>)> = Vec::new();
            for (i, entity) in entities.iter().enumerate() {
                match groups
                    .iter_mut()
                    .find(|(ty, _)| Arc::ptr_eq(ty, entity.entity_type()))
                {
                    Some((_, indices)) => indices.push(i),
                    None => groups.push((Arc::clone(entity.entity_type()), vec![i])),
                }
            }
            for (ty, indices) in &groups {
                let relation = ty.relation(&node.name)?;
                load_group(
                    &relation,
                    entities,
                    indices,
                    &node.name,
                    node.constraint.as_ref(),
                )
                .await?;
            }
            if !node.children.is_empty() {
                descend(entities, node).await?;
            }
        }
        Ok(())
    })
}

enum Slot {
    One(usize),
    Many(usize, usize),
}

async fn descend(entities: &mut [Entity], node: &EagerNode) -> Result<()> {
    let mut frontier: Vec<Entity> = Vec::new();
    let mut slots: Vec<Slot> = Vec::new();
    for (i, entity) in entities.iter_mut().enumerate() {
        match entity.relations_mut().remove(&node.name) {
            Some(Related::One(Some(child))) => {
                slots.push(Slot::One(i));
                frontier.push(*child);
            }
            Some(Related::One(None)) => {
                entity
                    .relations_mut()
                    .insert(node.name.clone(), Related::One(None));
            }
            Some(Related::Many(children)) => {
                slots.push(Slot::Many(i, children.len()));
                frontier.extend(children);
            }
            None => {}
        }
    }

    load_slice(&mut frontier, &node.children).await?;

    let mut restored = frontier.into_iter();
    for slot in slots {
        match slot {
            Slot::One(i) => {
                let Some(child) = restored.next() else {
                    return Err(Error::Other("eager frontier bookkeeping mismatch".into()));
                };
                entities[i]
                    .relations_mut()
                    .insert(node.name.clone(), Related::One(Some(Box::new(child))));
            }
            Slot::Many(i, count) => {
                let children: Vec<Entity> = restored.by_ref().take(count).collect();
                if children.len() != count {
                    return Err(Error::Other("eager frontier bookkeeping mismatch".into()));
                }
                entities[i]
                    .relations_mut()
                    .insert(node.name.clone(), Related::Many(children));
            }
        }
    }
    Ok(())
}

async fn load_group(
    relation: &Relation,
    entities: &mut [Entity],
    indices: &[usize],
    name: &str,
    constraint: Option<&Constraint>,
) -> Result<()> {
    match relation {
        Relation::HasOne(has) => load_has(true, has, entities, indices, name, constraint).await,
        Relation::HasMany(has) => load_has(false, has, entities, indices, name, constraint).await,
        Relation::BelongsTo(belongs) => {
            load_belongs_to(belongs, entities, indices, name, constraint).await
        }
        Relation::BelongsToMany(pivot) => {
            load_pivot(pivot, entities, indices, name, constraint).await
        }
        Relation::HasOneThrough(through) => {
            load_through(true, through, entities, indices, name, constraint).await
        }
        Relation::HasManyThrough(through) => {
            load_through(false, through, entities, indices, name, constraint).await
        }
        Relation::MorphOne(morph) => {
            load_morph(true, morph, entities, indices, name, constraint).await
        }
        Relation::MorphMany(morph) => {
            load_morph(false, morph, entities, indices, name, constraint).await
        }
        Relation::MorphTo(morph_to) => {
            load_morph_to(morph_to, entities, indices, name, constraint).await
        }
    }
}

/// Distinct non-null values of `column` across the chosen entities, in
/// first-seen order.
fn collect_keys(entities: &[Entity], indices: &[usize], column: &str) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    let mut keys = Vec::new();
    for &i in indices {
        let value = entities[i].raw_attribute(column);
        if let Some(key) = key_string(&value) {
            if seen.insert(key) {
                keys.push(value);
            }
        }
    }
    keys
}

fn group_by_column(rows: Vec<Entity>, column: &str) -> HashMap<String, Vec<Entity>> {
    let mut groups: HashMap<String, Vec<Entity>> = HashMap::new();
    for row in rows {
        if let Some(key) = key_string(&row.raw_attribute(column)) {
            groups.entry(key).or_default().push(row);
        }
    }
    groups
}

fn apply(builder: Builder, constraint: Option<&Constraint>) -> Builder {
    match constraint {
        Some(callback) => callback(builder),
        None => builder,
    }
}

async fn load_has(
    scalar: bool,
    has: &HasRelation,
    entities: &mut [Entity],
    indices: &[usize],
    name: &str,
    constraint: Option<&Constraint>,
) -> Result<()> {
    let keys = collect_keys(entities, indices, &has.local_key);
    let mut groups = if keys.is_empty() {
        HashMap::new()
    } else {
        let builder = Builder::new(Arc::clone(&has.target)).where_in(&has.foreign_key, keys);
        group_by_column(apply(builder, constraint).get().await?, &has.foreign_key)
    };
    for &i in indices {
        let key = key_string(&entities[i].raw_attribute(&has.local_key));
        let matched = key.and_then(|k| groups.get_mut(&k));
        let related = if scalar {
            Related::One(
                matched
                    .and_then(|rows| rows.first().cloned())
                    .map(Box::new),
            )
        } else {
            Related::Many(matched.cloned().unwrap_or_default())
        };
        entities[i].set_relation(name, related);
    }
    Ok(())
}

async fn load_belongs_to(
    belongs: &BelongsToRelation,
    entities: &mut [Entity],
    indices: &[usize],
    name: &str,
    constraint: Option<&Constraint>,
) -> Result<()> {
    let keys = collect_keys(entities, indices, &belongs.foreign_key);
    let owners: HashMap<String, Entity> = if keys.is_empty() {
        HashMap::new()
    } else {
        let builder =
            Builder::new(Arc::clone(&belongs.target)).where_in(&belongs.owner_key, keys);
        apply(builder, constraint)
            .get()
            .await?
            .into_iter()
            .filter_map(|row| key_string(&row.raw_attribute(&belongs.owner_key)).map(|k| (k, row)))
            .collect()
    };
    for &i in indices {
        let key = key_string(&entities[i].raw_attribute(&belongs.foreign_key));
        let owner = match key.and_then(|k| owners.get(&k)) {
            Some(owner) => Some(owner.clone()),
            None => default_instance(belongs)?,
        };
        entities[i].set_relation(name, Related::One(owner.map(Box::new)));
    }
    Ok(())
}

async fn load_morph(
    scalar: bool,
    morph: &MorphRelation,
    entities: &mut [Entity],
    indices: &[usize],
    name: &str,
    constraint: Option<&Constraint>,
) -> Result<()> {
    let keys = collect_keys(entities, indices, &morph.local_key);
    let mut groups = if keys.is_empty() {
        HashMap::new()
    } else {
        let builder = Builder::new(Arc::clone(&morph.target))
            .where_(&morph.type_column, "=", morph.type_value.as_str())
            .where_in(&morph.id_column, keys);
        group_by_column(apply(builder, constraint).get().await?, &morph.id_column)
    };
    for &i in indices {
        let key = key_string(&entities[i].raw_attribute(&morph.local_key));
        let matched = key.and_then(|k| groups.get_mut(&k));
        let related = if scalar {
            Related::One(
                matched
                    .and_then(|rows| rows.first().cloned())
                    .map(Box::new),
            )
        } else {
            Related::Many(matched.cloned().unwrap_or_default())
        };
        entities[i].set_relation(name, related);
    }
    Ok(())
}

async fn load_pivot(
    pivot: &PivotRelation,
    entities: &mut [Entity],
    indices: &[usize],
    name: &str,
    constraint: Option<&Constraint>,
) -> Result<()> {
    let parent_keys = collect_keys(entities, indices, &pivot.parent_key);
    if parent_keys.is_empty() {
        for &i in indices {
            entities[i].set_relation(name, Related::Many(Vec::new()));
        }
        return Ok(());
    }

    // 1. pivot rows for the whole batch
    let connection = pivot.target.connection()?;
    let mut ir = SelectIr::new(&pivot.pivot_table);
    let mut columns = vec![
        pivot.foreign_pivot_key.clone(),
        pivot.related_pivot_key.clone(),
    ];
    columns.extend(pivot.pivot_columns.iter().cloned());
    if pivot.pivot_timestamps {
        columns.push("created_at".to_string());
        columns.push("updated_at".to_string());
    }
    ir.columns = columns;
    ir.wheres.push(Predicate::In {
        column: pivot.foreign_pivot_key.clone(),
        values: parent_keys,
        connector: Connector::And,
    });
    for (column, op, value) in &pivot.where_pivot {
        ir.wheres.push(Predicate::Basic {
            column: column.clone(),
            op: op.clone(),
            value: value.clone(),
            connector: Connector::And,
        });
    }
    let (sql, params) = compile::select(&ir);
    let pivot_rows = connection.query(&sql, &params).await?;

    // 2. related rows, once
    let related_ids: Vec<Value> = {
        let mut seen = std::collections::HashSet::new();
        pivot_rows
            .iter()
            .filter_map(|row| {
                let value = row.get(&pivot.related_pivot_key).cloned()?;
                key_string(&value).filter(|k| seen.insert(k.clone())).map(|_| value)
            })
            .collect()
    };
    let related_index: HashMap<String, Entity> = if related_ids.is_empty() {
        HashMap::new()
    } else {
        let builder =
            Builder::new(Arc::clone(&pivot.target)).where_in(&pivot.related_key, related_ids);
        apply(builder, constraint)
            .get()
            .await?
            .into_iter()
            .filter_map(|row| key_string(&row.raw_attribute(&pivot.related_key)).map(|k| (k, row)))
            .collect()
    };

    // 3. group pivot rows per parent, attaching the pivot payload
    let mut per_parent: HashMap<String, Vec<Entity>> = HashMap::new();
    for row in &pivot_rows {
        let Some(parent_key) = row.get(&pivot.foreign_pivot_key).and_then(|v| key_string(v))
        else {
            continue;
        };
        let Some(related_key) = row.get(&pivot.related_pivot_key).and_then(|v| key_string(v))
        else {
            continue;
        };
        let Some(related) = related_index.get(&related_key) else {
            continue;
        };
        let mut related = related.clone();
        let mut payload = Attributes::new();
        for (column, value) in row {
            if column != &pivot.foreign_pivot_key && column != &pivot.related_pivot_key {
                payload.insert(column.clone(), value.clone());
            }
        }
        related.set_attribute(&pivot.pivot_alias, Value::Object(payload))?;
        per_parent.entry(parent_key).or_default().push(related);
    }

    for &i in indices {
        let key = key_string(&entities[i].raw_attribute(&pivot.parent_key));
        let related = key
            .and_then(|k| per_parent.get(&k).cloned())
            .unwrap_or_default();
        entities[i].set_relation(name, Related::Many(related));
    }
    Ok(())
}

async fn load_through(
    scalar: bool,
    through: &ThroughRelation,
    entities: &mut [Entity],
    indices: &[usize],
    name: &str,
    constraint: Option<&Constraint>,
) -> Result<()> {
    let parent_keys = collect_keys(entities, indices, &through.local_key);
    let empty = |entities: &mut [Entity]| {
        for &i in indices {
            let related = if scalar {
                Related::One(None)
            } else {
                Related::Many(Vec::new())
            };
            entities[i].set_relation(name, related);
        }
    };
    if parent_keys.is_empty() {
        empty(entities);
        return Ok(());
    }

    // 1. through rows: parent key → ordered through ids
    let through_rows = Builder::new(Arc::clone(&through.through))
        .where_in(&through.first_key, parent_keys)
        .get()
        .await?;
    let mut through_ids_by_parent: HashMap<String, Vec<Value>> = HashMap::new();
    let mut all_through_ids: Vec<Value> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for row in &through_rows {
        let Some(parent_key) = key_string(&row.raw_attribute(&through.first_key)) else {
            continue;
        };
        let id = row.raw_attribute(&through.through_key);
        let Some(id_key) = key_string(&id) else {
            continue;
        };
        through_ids_by_parent
            .entry(parent_key)
            .or_default()
            .push(id.clone());
        if seen.insert(id_key) {
            all_through_ids.push(id);
        }
    }
    if all_through_ids.is_empty() {
        empty(entities);
        return Ok(());
    }

    // 2. final rows, grouped by the through key they reference
    let builder =
        Builder::new(Arc::clone(&through.target)).where_in(&through.second_key, all_through_ids);
    let finals = group_by_column(apply(builder, constraint).get().await?, &through.second_key);

    for &i in indices {
        let parent_key = key_string(&entities[i].raw_attribute(&through.local_key));
        let mut collected: Vec<Entity> = Vec::new();
        if let Some(ids) = parent_key.and_then(|k| through_ids_by_parent.get(&k)) {
            for id in ids {
                if let Some(rows) = key_string(id).and_then(|k| finals.get(&k)) {
                    collected.extend(rows.iter().cloned());
                }
            }
        }
        let related = if scalar {
            Related::One(collected.into_iter().next().map(Box::new))
        } else {
            Related::Many(collected)
        };
        entities[i].set_relation(name, related);
    }
    Ok(())
}

async fn load_morph_to(
    morph_to: &MorphToRelation,
    entities: &mut [Entity],
    indices: &[usize],
    name: &str,
    constraint: Option<&Constraint>,
) -> Result<()> {
    // partition children by their type column, preserving first-seen order
    let mut partitions: Vec<(String, Vec<usize>)> = Vec::new();
    for &i in indices {
        let type_value = entities[i].raw_attribute(&morph_to.type_column);
        let id_value = entities[i].raw_attribute(&morph_to.id_column);
        let Some(alias) = type_value.as_str().map(str::to_string) else {
            entities[i].set_relation(name, Related::One(None));
            continue;
        };
        if id_value.is_null() {
            entities[i].set_relation(name, Related::One(None));
            continue;
        }
        match partitions.iter_mut().find(|(a, _)| *a == alias) {
            Some((_, list)) => list.push(i),
            None => partitions.push((alias, vec![i])),
        }
    }

    // one query per distinct type
    for (alias, children) in partitions {
        let target = MorphMap::resolve(&alias)?;
        let ids = collect_keys(entities, &children, &morph_to.id_column);
        let index: HashMap<String, Entity> = if ids.is_empty() {
            HashMap::new()
        } else {
            let builder = Builder::new(Arc::clone(&target)).where_in(target.primary_key(), ids);
            apply(builder, constraint)
                .get()
                .await?
                .into_iter()
                .filter_map(|row| {
                    key_string(&row.raw_attribute(target.primary_key())).map(|k| (k, row))
                })
                .collect()
        };
        for &i in children.iter() {
            let key = key_string(&entities[i].raw_attribute(&morph_to.id_column));
            let found = key.and_then(|k| index.get(&k)).cloned();
            entities[i].set_relation(name, Related::One(found.map(Box::new)));
        }
    }
    Ok(())
}
