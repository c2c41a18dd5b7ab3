//! Entity type descriptors and the process-wide morph map.
//!
//! An [`EntityType`] is the static description of one domain record: table,
//! primary key, timestamp management, mass-assignment and hidden sets, cast
//! table, declared relations and the driver connection. Descriptors are built
//! once at program start and shared as `Arc<EntityType>`; relation
//! declarations may reference each other mutually, which forms intentional
//! `Arc` cycles — descriptors live for the process lifetime.

use crate::builder::Builder;
use crate::cast::CastKind;
use crate::driver::Driver;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::relation::Relation;
use crate::value::Attributes;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, RwLock};

/// Static metadata for one domain record type.
pub struct EntityType {
    table: String,
    primary_key: String,
    timestamps: bool,
    fillable: HashSet<String>,
    hidden: HashSet<String>,
    casts: HashMap<String, CastKind>,
    relations: RwLock<HashMap<String, Relation>>,
    connection: RwLock<Option<Arc<dyn Driver>>>,
}

impl std::fmt::Debug for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityType")
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .finish_non_exhaustive()
    }
}

impl EntityType {
    /// Start describing an entity type bound to `table`.
    pub fn builder(table: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder {
            table: table.into(),
            primary_key: "id".to_string(),
            timestamps: false,
            fillable: HashSet::new(),
            hidden: HashSet::new(),
            casts: HashMap::new(),
            connection: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn manages_timestamps(&self) -> bool {
        self.timestamps
    }

    /// True when mass assignment permits this attribute: either the fillable
    /// set is empty (everything permitted) or the name is listed.
    pub fn is_fillable(&self, attribute: &str) -> bool {
        self.fillable.is_empty() || self.fillable.contains(attribute)
    }

    pub fn is_hidden(&self, attribute: &str) -> bool {
        self.hidden.contains(attribute)
    }

    pub fn cast_for(&self, attribute: &str) -> Option<CastKind> {
        self.casts.get(attribute).copied()
    }

    /// Swap the driver this type talks to.
    pub fn set_connection(&self, driver: Arc<dyn Driver>) {
        *self.connection.write().expect("connection lock") = Some(driver);
    }

    /// The configured driver, or an error when none was set.
    pub fn connection(&self) -> Result<Arc<dyn Driver>> {
        self.connection
            .read()
            .expect("connection lock")
            .clone()
            .ok_or_else(|| {
                Error::ConnectionFailed(format!("no connection configured for '{}'", self.table))
            })
    }

    // ==================== Relation declarations ====================

    /// Register a relation under `name`. The convenience declarators below
    /// cover the common shapes; use this for configured descriptors
    /// (pivot columns, touches, defaults).
    pub fn add_relation(&self, name: impl Into<String>, relation: Relation) {
        self.relations
            .write()
            .expect("relations lock")
            .insert(name.into(), relation);
    }

    pub fn has_one(&self, name: &str, target: &Arc<EntityType>, foreign_key: &str, local_key: &str) {
        self.add_relation(name, Relation::has_one(target, foreign_key, local_key));
    }

    pub fn has_many(
        &self,
        name: &str,
        target: &Arc<EntityType>,
        foreign_key: &str,
        local_key: &str,
    ) {
        self.add_relation(name, Relation::has_many(target, foreign_key, local_key));
    }

    pub fn belongs_to(
        &self,
        name: &str,
        target: &Arc<EntityType>,
        foreign_key: &str,
        owner_key: &str,
    ) {
        self.add_relation(name, Relation::belongs_to(target, foreign_key, owner_key));
    }

    /// Look up a declared relation, failing with [`Error::RelationUnknown`].
    pub fn relation(&self, name: &str) -> Result<Relation> {
        self.relations
            .read()
            .expect("relations lock")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::RelationUnknown(name.to_string()))
    }

    /// Names a `belongsTo` child should touch on save (descriptors declared
    /// with `.touches()`).
    pub(crate) fn touch_relation_names(&self) -> Vec<String> {
        self.relations
            .read()
            .expect("relations lock")
            .iter()
            .filter_map(|(name, rel)| match rel {
                Relation::BelongsTo(b) if b.touch => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    // ==================== Query entry points ====================

    /// A fresh query builder bound to this type.
    pub fn query(self: &Arc<Self>) -> Builder {
        Builder::new(Arc::clone(self))
    }

    /// All rows.
    pub async fn all(self: &Arc<Self>) -> Result<Vec<Entity>> {
        self.query().get().await
    }

    /// Find one row by primary key.
    pub async fn find(self: &Arc<Self>, id: impl Into<Value>) -> Result<Option<Entity>> {
        self.query()
            .where_(self.primary_key(), "=", id)
            .first()
            .await
    }

    /// Find one row by primary key or fail with [`Error::NotFound`].
    pub async fn find_or_fail(self: &Arc<Self>, id: impl Into<Value>) -> Result<Entity> {
        self.query()
            .where_(self.primary_key(), "=", id)
            .first_or_fail()
            .await
    }

    /// Build, fill and persist a new entity.
    pub async fn create(self: &Arc<Self>, attrs: Attributes) -> Result<Entity> {
        let mut entity = Entity::new(Arc::clone(self));
        entity.fill(attrs)?;
        entity.save().await?;
        Ok(entity)
    }

    /// Insert one or many raw rows without hydrating entities.
    pub async fn insert(self: &Arc<Self>, rows: Vec<Attributes>) -> Result<u64> {
        self.query().insert(rows).await
    }

    /// Update one row by primary key.
    pub async fn update_by_id(self: &Arc<Self>, id: impl Into<Value>, attrs: Attributes) -> Result<u64> {
        self.query()
            .where_(self.primary_key(), "=", id)
            .update(attrs)
            .await
    }

    /// Update one row by primary key, then re-fetch it with the given
    /// relations eagerly loaded.
    pub async fn update_and_fetch_by_id(
        self: &Arc<Self>,
        id: impl Into<Value>,
        attrs: Attributes,
        relations: &[&str],
    ) -> Result<Option<Entity>> {
        let id = id.into();
        self.query()
            .where_(self.primary_key(), "=", id.clone())
            .update(attrs)
            .await?;
        let mut query = self.query().where_(self.primary_key(), "=", id);
        for name in relations {
            query = query.with(name);
        }
        query.first().await
    }

    /// Count all rows.
    pub async fn count(self: &Arc<Self>) -> Result<u64> {
        self.query().count().await
    }

    /// First row, by no particular order.
    pub async fn first(self: &Arc<Self>) -> Result<Option<Entity>> {
        self.query().first().await
    }

    /// Builder shortcut: eager-load declaration.
    pub fn with(self: &Arc<Self>, path: &str) -> Builder {
        self.query().with(path)
    }

    /// Builder shortcut: basic predicate.
    pub fn where_(self: &Arc<Self>, column: &str, op: &str, value: impl Into<Value>) -> Builder {
        self.query().where_(column, op, value)
    }

    /// Builder shortcut: IN predicate.
    pub fn where_in(self: &Arc<Self>, column: &str, values: Vec<Value>) -> Builder {
        self.query().where_in(column, values)
    }

    /// Builder shortcut: ordering.
    pub fn order_by(self: &Arc<Self>, column: &str, direction: &str) -> Builder {
        self.query().order_by(column, direction)
    }

    /// Builder shortcut: NULL predicate.
    pub fn where_null(self: &Arc<Self>, column: &str) -> Builder {
        self.query().where_null(column)
    }

    /// Builder shortcut: NOT NULL predicate.
    pub fn where_not_null(self: &Arc<Self>, column: &str) -> Builder {
        self.query().where_not_null(column)
    }

    /// Builder shortcut: row limit.
    pub fn limit(self: &Arc<Self>, n: u64) -> Builder {
        self.query().limit(n)
    }

    /// Builder shortcut: row offset.
    pub fn offset(self: &Arc<Self>, n: u64) -> Builder {
        self.query().offset(n)
    }

    /// Count, then fetch one page of all rows.
    pub async fn paginate(self: &Arc<Self>, page: u64, per_page: u64) -> Result<crate::builder::PageResult> {
        self.query().paginate(page, per_page).await
    }

    /// Builder shortcut: reveal hidden attributes on hydrated entities.
    pub fn with_hidden(self: &Arc<Self>) -> Builder {
        self.query().with_hidden()
    }

    /// Builder shortcut: explicit hidden projection.
    pub fn without_hidden(self: &Arc<Self>, show: bool) -> Builder {
        self.query().without_hidden(show)
    }
}

/// Fluent construction of an [`EntityType`].
pub struct EntityTypeBuilder {
    table: String,
    primary_key: String,
    timestamps: bool,
    fillable: HashSet<String>,
    hidden: HashSet<String>,
    casts: HashMap<String, CastKind>,
    connection: Option<Arc<dyn Driver>>,
}

impl EntityTypeBuilder {
    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    /// Enable automatic `created_at` / `updated_at` management.
    pub fn timestamps(mut self, on: bool) -> Self {
        self.timestamps = on;
        self
    }

    /// Restrict mass assignment to the listed attributes. An empty set
    /// (the default) permits everything.
    pub fn fillable<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fillable = names.into_iter().map(Into::into).collect();
        self
    }

    /// Strip the listed attributes from serialization.
    pub fn hidden<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn cast(mut self, attribute: impl Into<String>, kind: CastKind) -> Self {
        self.casts.insert(attribute.into(), kind);
        self
    }

    pub fn connection(mut self, driver: Arc<dyn Driver>) -> Self {
        self.connection = Some(driver);
        self
    }

    pub fn build(self) -> Arc<EntityType> {
        Arc::new(EntityType {
            table: self.table,
            primary_key: self.primary_key,
            timestamps: self.timestamps,
            fillable: self.fillable,
            hidden: self.hidden,
            casts: self.casts,
            relations: RwLock::new(HashMap::new()),
            connection: RwLock::new(self.connection),
        })
    }
}

static MORPH_MAP: OnceLock<HashMap<String, Arc<EntityType>>> = OnceLock::new();

/// Process-wide mapping from morph-type alias strings to entity types.
///
/// Installed once during initialization and frozen afterwards; readers are
/// lock-free.
pub struct MorphMap;

impl MorphMap {
    /// Install the map. Fails if a map was already installed — the contract
    /// is immutability after first use.
    pub fn install<I, S>(entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Arc<EntityType>)>,
        S: Into<String>,
    {
        let map: HashMap<String, Arc<EntityType>> = entries
            .into_iter()
            .map(|(alias, ty)| (alias.into(), ty))
            .collect();
        MORPH_MAP
            .set(map)
            .map_err(|_| Error::Other("morph map already installed".to_string()))
    }

    /// Resolve an alias into its entity type.
    pub fn resolve(alias: &str) -> Result<Arc<EntityType>> {
        MORPH_MAP
            .get()
            .and_then(|map| map.get(alias))
            .cloned()
            .ok_or_else(|| Error::MorphUnresolved(alias.to_string()))
    }
}
