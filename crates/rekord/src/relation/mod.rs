//! Relation descriptors and per-parent traversal.
//!
//! Six relation kinds, each providing a per-parent `get` (through
//! [`RelationQuery`]) and a batched eager load (in [`eager`]). Descriptors
//! are declared on an [`EntityType`] once at startup, or built ad hoc from an
//! entity instance. Dispatch is static: the builder and loaders match on the
//! declared kind.

pub mod eager;
pub mod pivot;

pub use pivot::PivotAccessor;

use crate::builder::Builder;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::schema::{EntityType, MorphMap};
use crate::value::Attributes;
use serde_json::Value;
use std::sync::Arc;

/// Keys for hasOne / hasMany: the foreign key lives on the related table.
#[derive(Clone)]
pub struct HasRelation {
    pub target: Arc<EntityType>,
    pub foreign_key: String,
    pub local_key: String,
}

/// Keys for belongsTo: the foreign key lives on the child.
#[derive(Clone)]
pub struct BelongsToRelation {
    pub target: Arc<EntityType>,
    pub foreign_key: String,
    pub owner_key: String,
    pub touch: bool,
    pub default: Option<Attributes>,
}

/// Keys and pivot state for belongsToMany.
#[derive(Clone)]
pub struct PivotRelation {
    pub target: Arc<EntityType>,
    pub pivot_table: String,
    pub foreign_pivot_key: String,
    pub related_pivot_key: String,
    pub parent_key: String,
    pub related_key: String,
    pub pivot_columns: Vec<String>,
    pub pivot_timestamps: bool,
    pub pivot_alias: String,
    pub where_pivot: Vec<(String, String, Value)>,
}

/// Keys for hasOneThrough / hasManyThrough.
#[derive(Clone)]
pub struct ThroughRelation {
    pub target: Arc<EntityType>,
    pub through: Arc<EntityType>,
    /// Foreign key on the through table referencing the parent.
    pub first_key: String,
    /// Foreign key on the final table referencing the through table.
    pub second_key: String,
    /// Key on the parent matched by `first_key`.
    pub local_key: String,
    /// Key on the through table matched by `second_key`.
    pub through_key: String,
}

/// Keys for morphOne / morphMany: a type-discriminator column next to the id.
#[derive(Clone)]
pub struct MorphRelation {
    pub target: Arc<EntityType>,
    pub type_column: String,
    pub id_column: String,
    pub local_key: String,
    /// Value written into / matched against the type column; the declaring
    /// parent's table name.
    pub type_value: String,
}

/// Keys for morphTo: the child carries both columns.
#[derive(Clone)]
pub struct MorphToRelation {
    pub type_column: String,
    pub id_column: String,
}

/// A declared relation of any kind.
#[derive(Clone)]
pub enum Relation {
    HasOne(HasRelation),
    HasMany(HasRelation),
    BelongsTo(BelongsToRelation),
    BelongsToMany(PivotRelation),
    HasOneThrough(ThroughRelation),
    HasManyThrough(ThroughRelation),
    MorphOne(MorphRelation),
    MorphMany(MorphRelation),
    MorphTo(MorphToRelation),
}

impl Relation {
    pub fn has_one(target: &Arc<EntityType>, foreign_key: &str, local_key: &str) -> Self {
        Relation::HasOne(HasRelation {
            target: Arc::clone(target),
            foreign_key: foreign_key.to_string(),
            local_key: local_key.to_string(),
        })
    }

    pub fn has_many(target: &Arc<EntityType>, foreign_key: &str, local_key: &str) -> Self {
        Relation::HasMany(HasRelation {
            target: Arc::clone(target),
            foreign_key: foreign_key.to_string(),
            local_key: local_key.to_string(),
        })
    }

    pub fn belongs_to(target: &Arc<EntityType>, foreign_key: &str, owner_key: &str) -> Self {
        Relation::BelongsTo(BelongsToRelation {
            target: Arc::clone(target),
            foreign_key: foreign_key.to_string(),
            owner_key: owner_key.to_string(),
            touch: false,
            default: None,
        })
    }

    /// Pivot relation; parent and related keys default to each side's
    /// primary key and can be overridden with [`Relation::keys`].
    pub fn belongs_to_many(
        parent: &Arc<EntityType>,
        target: &Arc<EntityType>,
        pivot_table: &str,
        foreign_pivot_key: &str,
        related_pivot_key: &str,
    ) -> Self {
        Relation::BelongsToMany(PivotRelation {
            parent_key: parent.primary_key().to_string(),
            related_key: target.primary_key().to_string(),
            target: Arc::clone(target),
            pivot_table: pivot_table.to_string(),
            foreign_pivot_key: foreign_pivot_key.to_string(),
            related_pivot_key: related_pivot_key.to_string(),
            pivot_columns: Vec::new(),
            pivot_timestamps: false,
            pivot_alias: "pivot".to_string(),
            where_pivot: Vec::new(),
        })
    }

    pub fn has_many_through(
        parent: &Arc<EntityType>,
        target: &Arc<EntityType>,
        through: &Arc<EntityType>,
        first_key: &str,
        second_key: &str,
    ) -> Self {
        Relation::HasManyThrough(ThroughRelation {
            local_key: parent.primary_key().to_string(),
            through_key: through.primary_key().to_string(),
            target: Arc::clone(target),
            through: Arc::clone(through),
            first_key: first_key.to_string(),
            second_key: second_key.to_string(),
        })
    }

    pub fn has_one_through(
        parent: &Arc<EntityType>,
        target: &Arc<EntityType>,
        through: &Arc<EntityType>,
        first_key: &str,
        second_key: &str,
    ) -> Self {
        Relation::HasOneThrough(ThroughRelation {
            local_key: parent.primary_key().to_string(),
            through_key: through.primary_key().to_string(),
            target: Arc::clone(target),
            through: Arc::clone(through),
            first_key: first_key.to_string(),
            second_key: second_key.to_string(),
        })
    }

    /// Polymorphic one: `<morph_name>_type` / `<morph_name>_id` columns on
    /// the related table, matched against the parent's table name.
    pub fn morph_one(parent: &Arc<EntityType>, target: &Arc<EntityType>, morph_name: &str) -> Self {
        Relation::MorphOne(Self::morph_relation(parent, target, morph_name))
    }

    pub fn morph_many(parent: &Arc<EntityType>, target: &Arc<EntityType>, morph_name: &str) -> Self {
        Relation::MorphMany(Self::morph_relation(parent, target, morph_name))
    }

    fn morph_relation(
        parent: &Arc<EntityType>,
        target: &Arc<EntityType>,
        morph_name: &str,
    ) -> MorphRelation {
        MorphRelation {
            target: Arc::clone(target),
            type_column: format!("{morph_name}_type"),
            id_column: format!("{morph_name}_id"),
            local_key: parent.primary_key().to_string(),
            type_value: parent.table().to_string(),
        }
    }

    pub fn morph_to(morph_name: &str) -> Self {
        Relation::MorphTo(MorphToRelation {
            type_column: format!("{morph_name}_type"),
            id_column: format!("{morph_name}_id"),
        })
    }

    // ==================== Descriptor configuration ====================

    /// Override pivot parent/related keys (belongsToMany only; no-op on
    /// other kinds).
    pub fn keys(mut self, parent_key: &str, related_key: &str) -> Self {
        if let Relation::BelongsToMany(ref mut p) = self {
            p.parent_key = parent_key.to_string();
            p.related_key = related_key.to_string();
        }
        self
    }

    /// Surface extra pivot columns on related entities (belongsToMany only).
    pub fn with_pivot<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Relation::BelongsToMany(ref mut p) = self {
            p.pivot_columns = columns.into_iter().map(Into::into).collect();
        }
        self
    }

    /// Stamp `created_at` / `updated_at` on attach (belongsToMany only).
    pub fn with_pivot_timestamps(mut self) -> Self {
        if let Relation::BelongsToMany(ref mut p) = self {
            p.pivot_timestamps = true;
        }
        self
    }

    /// Attribute name the pivot payload is attached under (belongsToMany
    /// only; defaults to `pivot`).
    pub fn pivot_alias(mut self, alias: &str) -> Self {
        if let Relation::BelongsToMany(ref mut p) = self {
            p.pivot_alias = alias.to_string();
        }
        self
    }

    /// Constrain pivot rows (belongsToMany only).
    pub fn where_pivot(mut self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        if let Relation::BelongsToMany(ref mut p) = self {
            p.where_pivot
                .push((column.to_string(), op.to_string(), value.into()));
        }
        self
    }

    /// Refresh the parent's `updated_at` when the child saves (belongsTo
    /// only).
    pub fn touches(mut self) -> Self {
        if let Relation::BelongsTo(ref mut b) = self {
            b.touch = true;
        }
        self
    }

    /// Placeholder instance attributes when no row matches (belongsTo only).
    pub fn with_default(mut self, attrs: Attributes) -> Self {
        if let Relation::BelongsTo(ref mut b) = self {
            b.default = Some(attrs);
        }
        self
    }
}

/// A loaded relation result, as cached on an entity.
#[derive(Clone, Debug)]
pub enum Related {
    One(Option<Box<Entity>>),
    Many(Vec<Entity>),
}

impl Related {
    pub fn to_json(&self) -> Value {
        match self {
            Related::One(None) => Value::Null,
            Related::One(Some(entity)) => entity.to_json(),
            Related::Many(entities) => {
                Value::Array(entities.iter().map(Entity::to_json).collect())
            }
        }
    }

    /// The single related entity, if this is a scalar result.
    pub fn as_one(&self) -> Option<&Entity> {
        match self {
            Related::One(entity) => entity.as_deref(),
            Related::Many(_) => None,
        }
    }

    /// The related list, if this is a list result.
    pub fn as_many(&self) -> Option<&[Entity]> {
        match self {
            Related::Many(entities) => Some(entities),
            Related::One(_) => None,
        }
    }
}

/// A relation bound to one parent instance, ready to query.
pub struct RelationQuery {
    parent: Entity,
    relation: Relation,
}

impl RelationQuery {
    pub fn new(parent: Entity, relation: Relation) -> Self {
        Self { parent, relation }
    }

    /// Fetch the related entity or entities for the parent.
    pub async fn get(&self) -> Result<Related> {
        match &self.relation {
            Relation::HasOne(has) => {
                let rows = self.has_query(has).limit(1).get().await?;
                Ok(Related::One(rows.into_iter().next().map(Box::new)))
            }
            Relation::HasMany(has) => Ok(Related::Many(self.has_query(has).get().await?)),
            Relation::BelongsTo(belongs) => self.get_belongs_to(belongs).await,
            Relation::BelongsToMany(pivot) => {
                let accessor = PivotAccessor::new(self.parent.clone(), pivot.clone());
                Ok(Related::Many(accessor.fetch_related(None).await?))
            }
            Relation::HasOneThrough(through) => {
                let mut finals = self.get_through(through).await?;
                Ok(Related::One(if finals.is_empty() {
                    None
                } else {
                    Some(Box::new(finals.remove(0)))
                }))
            }
            Relation::HasManyThrough(through) => {
                Ok(Related::Many(self.get_through(through).await?))
            }
            Relation::MorphOne(morph) => {
                let rows = self.morph_query(morph).limit(1).get().await?;
                Ok(Related::One(rows.into_iter().next().map(Box::new)))
            }
            Relation::MorphMany(morph) => Ok(Related::Many(self.morph_query(morph).get().await?)),
            Relation::MorphTo(morph_to) => self.get_morph_to(morph_to).await,
        }
    }

    /// Scalar convenience over [`RelationQuery::get`].
    pub async fn first(&self) -> Result<Option<Entity>> {
        Ok(match self.get().await? {
            Related::One(entity) => entity.map(|boxed| *boxed),
            Related::Many(entities) => entities.into_iter().next(),
        })
    }

    /// List convenience over [`RelationQuery::get`].
    pub async fn all(&self) -> Result<Vec<Entity>> {
        Ok(match self.get().await? {
            Related::One(entity) => entity.map(|boxed| vec![*boxed]).unwrap_or_default(),
            Related::Many(entities) => entities,
        })
    }

    fn has_query(&self, has: &HasRelation) -> Builder {
        Builder::new(Arc::clone(&has.target)).where_(
            &has.foreign_key,
            "=",
            self.parent.raw_attribute(&has.local_key),
        )
    }

    fn morph_query(&self, morph: &MorphRelation) -> Builder {
        Builder::new(Arc::clone(&morph.target))
            .where_(&morph.type_column, "=", morph.type_value.as_str())
            .where_(
                &morph.id_column,
                "=",
                self.parent.raw_attribute(&morph.local_key),
            )
    }

    async fn get_belongs_to(&self, belongs: &BelongsToRelation) -> Result<Related> {
        let fk = self.parent.raw_attribute(&belongs.foreign_key);
        let found = if fk.is_null() {
            None
        } else {
            Builder::new(Arc::clone(&belongs.target))
                .where_(&belongs.owner_key, "=", fk)
                .first()
                .await?
        };
        match found {
            Some(entity) => Ok(Related::One(Some(Box::new(entity)))),
            None => Ok(Related::One(default_instance(belongs)?.map(Box::new))),
        }
    }

    async fn get_through(&self, through: &ThroughRelation) -> Result<Vec<Entity>> {
        let local = self.parent.raw_attribute(&through.local_key);
        let through_rows = Builder::new(Arc::clone(&through.through))
            .where_(&through.first_key, "=", local)
            .get()
            .await?;
        let through_ids: Vec<Value> = through_rows
            .iter()
            .map(|row| row.raw_attribute(&through.through_key))
            .filter(|v| !v.is_null())
            .collect();
        if through_ids.is_empty() {
            return Ok(Vec::new());
        }
        Builder::new(Arc::clone(&through.target))
            .where_in(&through.second_key, through_ids)
            .get()
            .await
    }

    async fn get_morph_to(&self, morph_to: &MorphToRelation) -> Result<Related> {
        let type_value = self.parent.raw_attribute(&morph_to.type_column);
        let id_value = self.parent.raw_attribute(&morph_to.id_column);
        if type_value.is_null() || id_value.is_null() {
            return Ok(Related::One(None));
        }
        let alias = type_value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::MorphUnresolved(type_value.to_string()))?;
        let target = MorphMap::resolve(&alias)?;
        let found = Builder::new(Arc::clone(&target))
            .where_(target.primary_key(), "=", id_value)
            .first()
            .await?;
        Ok(Related::One(found.map(Box::new)))
    }
}

/// A non-persisted placeholder for `belongsTo` relations declared with a
/// default.
pub(crate) fn default_instance(belongs: &BelongsToRelation) -> Result<Option<Entity>> {
    let Some(defaults) = &belongs.default else {
        return Ok(None);
    };
    let mut entity = Entity::new(Arc::clone(&belongs.target));
    entity.fill(defaults.clone())?;
    Ok(Some(entity))
}
