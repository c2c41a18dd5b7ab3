//! Runtime row instances.
//!
//! An [`Entity`] is an ordered attribute bag bound to an [`EntityType`]
//! descriptor, with a snapshot of the last storage synchronization for dirty
//! tracking, a cache of loaded relations, and the hidden-attribute
//! projection flag propagated from the builder that hydrated it.
//!
//! Entities are owned by their caller and are not safe for concurrent
//! mutation; two tasks must not `save` the same instance at once.

use crate::cast::cast_value;
use crate::error::{Error, Result};
use crate::ir::{Connector, Predicate};
use crate::ir::compile;
use crate::relation::{PivotAccessor, Related, Relation, RelationQuery};
use crate::schema::EntityType;
use crate::value::{now, Attributes};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct Entity {
    ty: Arc<EntityType>,
    attributes: Attributes,
    original: Attributes,
    relations: BTreeMap<String, Related>,
    exists: bool,
    reveal_hidden: bool,
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("table", &self.ty.table())
            .field("attributes", &self.attributes)
            .field("exists", &self.exists)
            .finish()
    }
}

/// Serializes through [`Entity::to_json`], so the hidden-attribute
/// projection and loaded relations apply.
impl serde::Serialize for Entity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl Entity {
    /// A fresh, unpersisted instance of the given type.
    pub fn new(ty: Arc<EntityType>) -> Self {
        Self {
            ty,
            attributes: Attributes::new(),
            original: Attributes::new(),
            relations: BTreeMap::new(),
            exists: false,
            reveal_hidden: false,
        }
    }

    /// Hydrate from a raw driver row: attributes stay raw (casts apply on
    /// read), the snapshot equals the row, and the instance is marked as
    /// backed by storage.
    pub(crate) fn hydrate(ty: Arc<EntityType>, row: Attributes, reveal_hidden: bool) -> Self {
        Self {
            original: row.clone(),
            attributes: row,
            relations: BTreeMap::new(),
            exists: true,
            reveal_hidden,
            ty,
        }
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.ty
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Per-instance projection override: show hidden attributes in
    /// serialization.
    pub fn reveal_hidden(&mut self, on: bool) {
        self.reveal_hidden = on;
    }

    // ==================== Attributes ====================

    /// Mass-assign attributes, honoring the fillable set. Keys outside the
    /// set are silently skipped.
    pub fn fill(&mut self, attrs: Attributes) -> Result<&mut Self> {
        for (key, value) in attrs {
            if self.ty.is_fillable(&key) {
                self.set_attribute(&key, value)?;
            }
        }
        Ok(self)
    }

    /// Write one attribute, casting per the type's cast table. `null`
    /// bypasses casting.
    pub fn set_attribute(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let value = match self.ty.cast_for(key) {
            Some(kind) => cast_value(kind, key, value)?,
            None => value,
        };
        self.attributes.insert(key.to_string(), value);
        Ok(())
    }

    /// Typed read: a loaded relation shadows an attribute of the same name;
    /// otherwise the attribute comes back in casted form. Absent keys read
    /// as `null`.
    pub fn get_attribute(&self, key: &str) -> Result<Value> {
        if let Some(related) = self.relations.get(key) {
            return Ok(related.to_json());
        }
        let Some(raw) = self.attributes.get(key) else {
            return Ok(Value::Null);
        };
        match self.ty.cast_for(key) {
            Some(kind) => cast_value(kind, key, raw.clone()),
            None => Ok(raw.clone()),
        }
    }

    /// Raw attribute value, uncasted.
    pub(crate) fn raw_attribute(&self, key: &str) -> Value {
        self.attributes.get(key).cloned().unwrap_or(Value::Null)
    }

    /// The primary key value, raw.
    pub fn key(&self) -> Value {
        self.raw_attribute(self.ty.primary_key())
    }

    // ==================== Dirty tracking ====================

    /// Attributes whose value differs from the last storage snapshot.
    pub fn get_dirty(&self) -> Attributes {
        let mut dirty = Attributes::new();
        for (key, value) in &self.attributes {
            if self.original.get(key) != Some(value) {
                dirty.insert(key.clone(), value.clone());
            }
        }
        dirty
    }

    pub fn is_dirty(&self) -> bool {
        self.attributes
            .iter()
            .any(|(key, value)| self.original.get(key) != Some(value))
    }

    // ==================== Persistence ====================

    /// Persist the instance: INSERT when no storage row corresponds to it
    /// yet, UPDATE of the dirty set otherwise. After a successful save the
    /// snapshot equals the attributes.
    pub async fn save(&mut self) -> Result<()> {
        if self.exists {
            self.perform_update().await
        } else {
            self.perform_insert().await
        }
    }

    async fn perform_insert(&mut self) -> Result<()> {
        let driver = self.ty.connection()?;
        if self.ty.manages_timestamps() {
            let stamp = now();
            self.attributes
                .entry("created_at".to_string())
                .or_insert_with(|| stamp.clone());
            self.attributes.insert("updated_at".to_string(), stamp);
        }
        let (sql, params) = compile::insert(self.ty.table(), std::slice::from_ref(&self.attributes));
        let result = driver
            .insert(&sql, &params, self.ty.primary_key())
            .await?;
        if let Some(id) = result.last_id {
            let pk = self.ty.primary_key().to_string();
            if self.attributes.get(&pk).is_none_or(Value::is_null) {
                self.attributes.insert(pk, Value::from(id));
            }
        }
        self.exists = true;
        self.original = self.attributes.clone();
        self.touch_parents(&driver).await
    }

    async fn perform_update(&mut self) -> Result<()> {
        let driver = self.ty.connection()?;
        if self.ty.manages_timestamps() {
            self.attributes.insert("updated_at".to_string(), now());
        }
        let dirty = self.get_dirty();
        if dirty.is_empty() {
            return Ok(());
        }
        let wheres = vec![Predicate::Basic {
            column: self.ty.primary_key().to_string(),
            op: "=".to_string(),
            value: self.key(),
            connector: Connector::And,
        }];
        let (sql, params) = compile::update(self.ty.table(), &dirty, &wheres);
        driver.exec(&sql, &params).await?;
        self.original = self.attributes.clone();
        Ok(())
    }

    /// Refresh `updated_at` on parents of `belongsTo` relations declared
    /// with `.touches()`.
    async fn touch_parents(&self, driver: &Arc<dyn crate::driver::Driver>) -> Result<()> {
        for name in self.ty.touch_relation_names() {
            let Relation::BelongsTo(belongs) = self.ty.relation(&name)? else {
                continue;
            };
            let fk = self.raw_attribute(&belongs.foreign_key);
            if fk.is_null() {
                continue;
            }
            let mut attrs = Attributes::new();
            attrs.insert("updated_at".to_string(), now());
            let wheres = vec![Predicate::Basic {
                column: belongs.owner_key.clone(),
                op: "=".to_string(),
                value: fk,
                connector: Connector::And,
            }];
            let (sql, params) = compile::update(belongs.target.table(), &attrs, &wheres);
            driver.exec(&sql, &params).await?;
        }
        Ok(())
    }

    /// Delete the backing row by primary key. A no-op returning `false`
    /// when the instance was never persisted.
    pub async fn destroy(&mut self) -> Result<bool> {
        if !self.exists {
            return Ok(false);
        }
        let driver = self.ty.connection()?;
        let wheres = vec![Predicate::Basic {
            column: self.ty.primary_key().to_string(),
            op: "=".to_string(),
            value: self.key(),
            connector: Connector::And,
        }];
        let (sql, params) = compile::delete(self.ty.table(), &wheres);
        let result = driver.exec(&sql, &params).await?;
        self.exists = false;
        Ok(result.affected > 0)
    }

    // ==================== Serialization ====================

    /// JSON projection: attributes minus the hidden set (unless revealing),
    /// overlaid with the loaded relations.
    pub fn to_json(&self) -> Value {
        let mut map = self.attributes.clone();
        if !self.reveal_hidden {
            map.retain(|key, _| !self.ty.is_hidden(key));
        }
        for (name, related) in &self.relations {
            map.insert(name.clone(), related.to_json());
        }
        Value::Object(map)
    }

    // ==================== Relations ====================

    /// Cache a loaded relation result.
    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) {
        self.relations.insert(name.into(), related);
    }

    /// A previously loaded relation, if any.
    pub fn related(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub(crate) fn relations_mut(&mut self) -> &mut BTreeMap<String, Related> {
        &mut self.relations
    }

    /// Eager-load relations on this already-hydrated instance. Dot paths
    /// descend the same way as the builder's `with`.
    pub async fn load(&mut self, paths: &[&str]) -> Result<()> {
        let tree = crate::relation::eager::parse_paths(paths);
        crate::relation::eager::load_slice(std::slice::from_mut(self), &tree).await
    }

    /// Query a declared relation for this instance.
    pub fn relation_query(&self, name: &str) -> Result<RelationQuery> {
        let relation = self.ty.relation(name)?;
        Ok(RelationQuery::new(self.clone(), relation))
    }

    /// Pivot accessor for a declared `belongsToMany` relation: attach,
    /// detach, sync, toggle, pivot updates.
    pub fn pivot(&self, name: &str) -> Result<PivotAccessor> {
        match self.ty.relation(name)? {
            Relation::BelongsToMany(pivot) => Ok(PivotAccessor::new(self.clone(), pivot)),
            _ => Err(Error::Unsupported(format!(
                "'{name}' is not a belongsToMany relation"
            ))),
        }
    }

    // Ad-hoc relation declarators: build a one-off relation query without a
    // prior declaration on the type.

    pub fn has_one(&self, target: &Arc<EntityType>, foreign_key: &str, local_key: &str) -> RelationQuery {
        RelationQuery::new(self.clone(), Relation::has_one(target, foreign_key, local_key))
    }

    pub fn has_many(&self, target: &Arc<EntityType>, foreign_key: &str, local_key: &str) -> RelationQuery {
        RelationQuery::new(self.clone(), Relation::has_many(target, foreign_key, local_key))
    }

    pub fn belongs_to(&self, target: &Arc<EntityType>, foreign_key: &str, owner_key: &str) -> RelationQuery {
        RelationQuery::new(self.clone(), Relation::belongs_to(target, foreign_key, owner_key))
    }

    pub fn belongs_to_many(
        &self,
        target: &Arc<EntityType>,
        pivot_table: &str,
        foreign_pivot_key: &str,
        related_pivot_key: &str,
    ) -> RelationQuery {
        RelationQuery::new(
            self.clone(),
            Relation::belongs_to_many(
                self.entity_type(),
                target,
                pivot_table,
                foreign_pivot_key,
                related_pivot_key,
            ),
        )
    }

    pub fn has_many_through(
        &self,
        target: &Arc<EntityType>,
        through: &Arc<EntityType>,
        first_key: &str,
        second_key: &str,
    ) -> RelationQuery {
        RelationQuery::new(
            self.clone(),
            Relation::has_many_through(self.entity_type(), target, through, first_key, second_key),
        )
    }

    pub fn has_one_through(
        &self,
        target: &Arc<EntityType>,
        through: &Arc<EntityType>,
        first_key: &str,
        second_key: &str,
    ) -> RelationQuery {
        RelationQuery::new(
            self.clone(),
            Relation::has_one_through(self.entity_type(), target, through, first_key, second_key),
        )
    }

    pub fn morph_one(&self, target: &Arc<EntityType>, morph_name: &str) -> RelationQuery {
        RelationQuery::new(self.clone(), Relation::morph_one(self.entity_type(), target, morph_name))
    }

    pub fn morph_many(&self, target: &Arc<EntityType>, morph_name: &str) -> RelationQuery {
        RelationQuery::new(self.clone(), Relation::morph_many(self.entity_type(), target, morph_name))
    }

    pub fn morph_to(&self, morph_name: &str) -> RelationQuery {
        RelationQuery::new(self.clone(), Relation::morph_to(morph_name))
    }

    /// Point a `belongsTo` foreign key at the given parent and cache it.
    pub fn associate(&mut self, name: &str, parent: &Entity) -> Result<()> {
        let Relation::BelongsTo(belongs) = self.ty.relation(name)? else {
            return Err(Error::Unsupported(format!(
                "'{name}' is not a belongsTo relation"
            )));
        };
        let owner_value = parent.raw_attribute(&belongs.owner_key);
        self.attributes.insert(belongs.foreign_key.clone(), owner_value);
        self.relations
            .insert(name.to_string(), Related::One(Some(Box::new(parent.clone()))));
        Ok(())
    }

    /// Clear a `belongsTo` foreign key.
    pub fn dissociate(&mut self, name: &str) -> Result<()> {
        let Relation::BelongsTo(belongs) = self.ty.relation(name)? else {
            return Err(Error::Unsupported(format!(
                "'{name}' is not a belongsTo relation"
            )));
        };
        self.attributes.insert(belongs.foreign_key.clone(), Value::Null);
        self.relations.insert(name.to_string(), Related::One(None));
        Ok(())
    }
}
