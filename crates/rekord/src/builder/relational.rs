//! Relational filtering and count annotation.
//!
//! `whereHas` / `has` / `whereDoesntHave` compile to joins against the
//! related table, derived from the declared relation descriptor (no name
//! heuristics: key names are always explicit at declaration time).
//! `withCount` appends a correlated scalar subquery column per relation.

use super::Builder;
use crate::error::{Error, Result};
use crate::ir::{Connector, Join, JoinKind, Predicate};
use crate::relation::Relation;
use crate::schema::EntityType;
use serde_json::Value;
use std::sync::Arc;

impl Builder {
    /// Keep only parents that have at least one related row, via an inner
    /// join. Fails with [`Error::RelationUnknown`] for undeclared names.
    pub fn where_has(self, name: &str) -> Result<Self> {
        self.where_has_impl(name, None::<fn(Builder) -> Builder>)
    }

    /// `where_has` with a constraint on the related rows; the callback's
    /// predicates are prefixed with the related table and appended to the
    /// outer wheres.
    pub fn where_has_constrained<F>(self, name: &str, constraint: F) -> Result<Self>
    where
        F: FnOnce(Builder) -> Builder,
    {
        self.where_has_impl(name, Some(constraint))
    }

    /// Keep only parents with at least `n` (per `op`) related rows: the
    /// `where_has` join plus `GROUP BY parent.pk` and a count having.
    pub fn has(self, name: &str, op: &str, n: i64) -> Result<Self> {
        let parent = Arc::clone(self.model());
        let grouped = format!("{}.{}", parent.table(), parent.primary_key());
        Ok(self
            .where_has(name)?
            .group_by(&grouped)
            .having_count("*", op, n))
    }

    /// Keep only parents with no related row: a left join probed for NULL.
    pub fn where_doesnt_have(mut self, name: &str) -> Result<Self> {
        let relation = self.model().relation(name)?;
        let parent = Arc::clone(self.model());
        let (joins, probe_column) = absence_joins(&parent, &relation, name)?;
        self.ir_mut().joins.extend(joins);
        self.ir_mut().wheres.push(Predicate::IsNull {
            column: probe_column,
            connector: Connector::And,
        });
        Ok(self)
    }

    fn where_has_impl<F>(mut self, name: &str, constraint: Option<F>) -> Result<Self>
    where
        F: FnOnce(Builder) -> Builder,
    {
        let relation = self.model().relation(name)?;
        let parent = Arc::clone(self.model());
        let (joins, extra_wheres, related) = presence_joins(&parent, &relation, name)?;
        self.ir_mut().joins.extend(joins);
        self.ir_mut().wheres.extend(extra_wheres);
        if let Some(constraint) = constraint {
            let sub = constraint(Builder::new(Arc::clone(&related)));
            let related_table = related.table().to_string();
            for mut predicate in sub.take_parts().1.wheres {
                let column = predicate.column_mut();
                if !column.contains('.') {
                    *column = format!("{related_table}.{column}");
                }
                self.ir_mut().wheres.push(predicate);
            }
        }
        Ok(self)
    }
}

type PresenceParts = (Vec<Join>, Vec<Predicate>, Arc<EntityType>);

fn inner(table: &str, left_col: String, right_col: String) -> Join {
    Join {
        kind: JoinKind::Inner,
        table: table.to_string(),
        left_col,
        op: "=".to_string(),
        right_col,
    }
}

fn left(table: &str, left_col: String, right_col: String) -> Join {
    Join {
        kind: JoinKind::Left,
        table: table.to_string(),
        left_col,
        op: "=".to_string(),
        right_col,
    }
}

fn presence_joins(
    parent: &Arc<EntityType>,
    relation: &Relation,
    name: &str,
) -> Result<PresenceParts> {
    let parent_table = parent.table();
    match relation {
        Relation::HasOne(has) | Relation::HasMany(has) => Ok((
            vec![inner(
                has.target.table(),
                format!("{}.{}", has.target.table(), has.foreign_key),
                format!("{parent_table}.{}", has.local_key),
            )],
            Vec::new(),
            Arc::clone(&has.target),
        )),
        Relation::BelongsTo(belongs) => Ok((
            vec![inner(
                belongs.target.table(),
                format!("{}.{}", belongs.target.table(), belongs.owner_key),
                format!("{parent_table}.{}", belongs.foreign_key),
            )],
            Vec::new(),
            Arc::clone(&belongs.target),
        )),
        Relation::BelongsToMany(pivot) => Ok((
            vec![
                inner(
                    &pivot.pivot_table,
                    format!("{}.{}", pivot.pivot_table, pivot.foreign_pivot_key),
                    format!("{parent_table}.{}", pivot.parent_key),
                ),
                inner(
                    pivot.target.table(),
                    format!("{}.{}", pivot.target.table(), pivot.related_key),
                    format!("{}.{}", pivot.pivot_table, pivot.related_pivot_key),
                ),
            ],
            Vec::new(),
            Arc::clone(&pivot.target),
        )),
        Relation::HasOneThrough(through) | Relation::HasManyThrough(through) => Ok((
            vec![
                inner(
                    through.through.table(),
                    format!("{}.{}", through.through.table(), through.first_key),
                    format!("{parent_table}.{}", through.local_key),
                ),
                inner(
                    through.target.table(),
                    format!("{}.{}", through.target.table(), through.second_key),
                    format!("{}.{}", through.through.table(), through.through_key),
                ),
            ],
            Vec::new(),
            Arc::clone(&through.target),
        )),
        Relation::MorphOne(morph) | Relation::MorphMany(morph) => Ok((
            vec![inner(
                morph.target.table(),
                format!("{}.{}", morph.target.table(), morph.id_column),
                format!("{parent_table}.{}", morph.local_key),
            )],
            vec![Predicate::Basic {
                column: format!("{}.{}", morph.target.table(), morph.type_column),
                op: "=".to_string(),
                value: morph.type_value.clone().into(),
                connector: Connector::And,
            }],
            Arc::clone(&morph.target),
        )),
        Relation::MorphTo(_) => Err(Error::Unsupported(format!(
            "whereHas on morphTo relation '{name}': the target table is row-dependent"
        ))),
    }
}

fn absence_joins(
    parent: &Arc<EntityType>,
    relation: &Relation,
    name: &str,
) -> Result<(Vec<Join>, String)> {
    let parent_table = parent.table();
    match relation {
        Relation::HasOne(has) | Relation::HasMany(has) => Ok((
            vec![left(
                has.target.table(),
                format!("{}.{}", has.target.table(), has.foreign_key),
                format!("{parent_table}.{}", has.local_key),
            )],
            format!("{}.{}", has.target.table(), has.target.primary_key()),
        )),
        Relation::BelongsTo(belongs) => Ok((
            vec![left(
                belongs.target.table(),
                format!("{}.{}", belongs.target.table(), belongs.owner_key),
                format!("{parent_table}.{}", belongs.foreign_key),
            )],
            format!("{}.{}", belongs.target.table(), belongs.owner_key),
        )),
        Relation::BelongsToMany(pivot) => Ok((
            vec![left(
                &pivot.pivot_table,
                format!("{}.{}", pivot.pivot_table, pivot.foreign_pivot_key),
                format!("{parent_table}.{}", pivot.parent_key),
            )],
            format!("{}.{}", pivot.pivot_table, pivot.related_pivot_key),
        )),
        Relation::HasOneThrough(through) | Relation::HasManyThrough(through) => Ok((
            vec![
                left(
                    through.through.table(),
                    format!("{}.{}", through.through.table(), through.first_key),
                    format!("{parent_table}.{}", through.local_key),
                ),
                left(
                    through.target.table(),
                    format!("{}.{}", through.target.table(), through.second_key),
                    format!("{}.{}", through.through.table(), through.through_key),
                ),
            ],
            format!("{}.{}", through.target.table(), through.target.primary_key()),
        )),
        Relation::MorphOne(_) | Relation::MorphMany(_) | Relation::MorphTo(_) => {
            Err(Error::Unsupported(format!(
                "whereDoesntHave on polymorphic relation '{name}'"
            )))
        }
    }
}

/// The `<name>_count` scalar subquery column for one relation, plus the
/// parameters bound by its placeholders.
pub(super) fn count_subquery(
    parent: &Arc<EntityType>,
    name: &str,
    relation: &Relation,
) -> Result<(String, Vec<Value>)> {
    let parent_table = parent.table();
    let mut params: Vec<Value> = Vec::new();
    let body = match relation {
        Relation::HasOne(has) | Relation::HasMany(has) => format!(
            "SELECT COUNT(*) FROM {related} WHERE {related}.{fk} = {parent_table}.{local}",
            related = has.target.table(),
            fk = has.foreign_key,
            local = has.local_key,
        ),
        Relation::BelongsTo(belongs) => format!(
            "SELECT COUNT(*) FROM {related} WHERE {related}.{owner} = {parent_table}.{fk}",
            related = belongs.target.table(),
            owner = belongs.owner_key,
            fk = belongs.foreign_key,
        ),
        Relation::BelongsToMany(pivot) => format!(
            "SELECT COUNT(*) FROM {pivot_table} WHERE {pivot_table}.{fpk} = {parent_table}.{pk}",
            pivot_table = pivot.pivot_table,
            fpk = pivot.foreign_pivot_key,
            pk = pivot.parent_key,
        ),
        Relation::HasOneThrough(through) | Relation::HasManyThrough(through) => format!(
            "SELECT COUNT(*) FROM {related} INNER JOIN {mid} ON {related}.{second} = {mid}.{tk} \
             WHERE {mid}.{first} = {parent_table}.{local}",
            related = through.target.table(),
            mid = through.through.table(),
            second = through.second_key,
            tk = through.through_key,
            first = through.first_key,
            local = through.local_key,
        ),
        Relation::MorphOne(morph) | Relation::MorphMany(morph) => {
            params.push(morph.type_value.clone().into());
            format!(
                "SELECT COUNT(*) FROM {related} WHERE {related}.{type_col} = ? \
                 AND {related}.{id_col} = {parent_table}.{local}",
                related = morph.target.table(),
                type_col = morph.type_column,
                id_col = morph.id_column,
                local = morph.local_key,
            )
        }
        Relation::MorphTo(_) => {
            return Err(Error::Unsupported(format!(
                "withCount on morphTo relation '{name}'"
            )));
        }
    };
    Ok((format!("({body}) AS {name}_count"), params))
}
