//! Convenience re-exports.
//!
//! ```ignore
//! use rekord::prelude::*;
//! ```

pub use crate::builder::{Builder, PageResult};
pub use crate::cast::CastKind;
pub use crate::dialect::Dialect;
pub use crate::driver::{connect, Driver, ExecResult, Row};
pub use crate::entity::Entity;
pub use crate::error::{Error, Result};
pub use crate::migrate::Migrator;
pub use crate::relation::{Related, Relation, RelationQuery};
pub use crate::schema::{EntityType, MorphMap};
pub use crate::value::Attributes;
