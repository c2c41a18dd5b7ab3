//! # rekord
//!
//! An Active Record-style ORM core for SQLite, PostgreSQL and MySQL.
//!
//! ## Features
//!
//! - **Dynamic entities**: rows are ordered attribute bags with cast tables,
//!   dirty tracking, mass-assignment guards and hidden-attribute projection
//! - **Fluent queries**: a neutral statement IR compiled per dialect, with
//!   relational filters (`where_has`, `with_count`) and pagination
//! - **Batched eager loading**: six relation kinds, nested dot paths, a
//!   bounded number of queries per relation regardless of batch size
//! - **Migrations**: directory-sourced SQL units applied in batches, with
//!   batch-scoped rollback
//!
//! ```ignore
//! use rekord::{driver, CastKind, EntityType};
//!
//! let conn = driver::connect("sqlite::memory:").await?;
//! let users = EntityType::builder("users")
//!     .timestamps(true)
//!     .cast("age", CastKind::Int)
//!     .connection(conn.clone())
//!     .build();
//! let posts = EntityType::builder("posts").connection(conn).build();
//! users.has_many("posts", &posts, "user_id", "id");
//!
//! let adults = users
//!     .where_("age", ">=", 18)
//!     .with("posts")
//!     .order_by("id", "asc")
//!     .get()
//!     .await?;
//! ```

pub mod builder;
pub mod cast;
pub mod dialect;
pub mod driver;
pub mod entity;
pub mod error;
pub mod ir;
pub mod migrate;
pub mod relation;
pub mod schema;
pub mod value;

pub mod prelude;

pub use builder::{Builder, PageResult};
pub use cast::CastKind;
pub use dialect::Dialect;
pub use driver::{connect, Driver, ExecResult, Row};
pub use entity::Entity;
pub use error::{Error, Result};
pub use migrate::{MigrationStatus, Migrator, UnitStatus};
pub use relation::{PivotAccessor, Related, Relation, RelationQuery};
pub use schema::{EntityType, EntityTypeBuilder, MorphMap};
pub use value::Attributes;

#[cfg(test)]
pub(crate) mod testing;
