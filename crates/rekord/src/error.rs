//! Error types for rekord

use thiserror::Error;

/// Result type alias for rekord operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for database and record operations
#[derive(Debug, Error)]
pub enum Error {
    /// The backing driver crate for the requested dialect is not compiled in
    #[error("Driver unavailable: enable the '{feature}' feature ({package})")]
    DriverUnavailable {
        feature: &'static str,
        package: &'static str,
    },

    /// Initial connect error
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution error, carrying the dialect error code when known
    #[error("Query error: {message}")]
    Query {
        code: Option<String>,
        message: String,
    },

    /// Unique constraint violation
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A relation name was used that is not declared on the entity type
    #[error("Unknown relation '{0}'")]
    RelationUnknown(String),

    /// A polymorphic type column value has no morph map entry
    #[error("Unresolved morph alias '{0}'")]
    MorphUnresolved(String),

    /// Malformed JSON on a json-cast attribute
    #[error("JSON parse error: {0}")]
    JsonParse(String),

    /// Unparseable date on a date-cast attribute
    #[error("Date parse error: {0}")]
    DateParse(String),

    /// Attribute cast failure
    #[error("Cast failed for '{attribute}': {message}")]
    CastFailed { attribute: String, message: String },

    /// Migration unit failure, carrying the offending unit identifier
    #[error("Migration '{unit}' failed: {message}")]
    Migration { unit: String, message: String },

    /// Operation aborted by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation not expressible for the given relation kind or dialect
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a query error without a dialect code
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            code: None,
            message: message.into(),
        }
    }

    /// Create a query error carrying a dialect code
    pub fn query_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a cast failure for a specific attribute
    pub fn cast_failed(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CastFailed {
            attribute: attribute.into(),
            message: message.into(),
        }
    }

    /// Create a migration error for a specific unit
    pub fn migration(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Migration {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }

    /// Check if this is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Classify a raw dialect error by SQLSTATE-style code.
    ///
    /// Shared by the PostgreSQL and MySQL adapters; codes that do not map to
    /// a dedicated variant stay generic `Query` errors.
    #[cfg_attr(
        not(any(feature = "postgres", feature = "mysql")),
        allow(dead_code)
    )]
    pub(crate) fn from_dialect_code(code: &str, message: String) -> Self {
        match code {
            // Postgres SQLSTATE
            "23505" => Self::UniqueViolation(message),
            "23503" => Self::ForeignKeyViolation(message),
            "57014" => Self::Cancelled,
            // MySQL numeric codes
            "1062" => Self::UniqueViolation(message),
            "1452" | "1451" => Self::ForeignKeyViolation(message),
            "1317" => Self::Cancelled,
            _ => Self::Query {
                code: Some(code.to_string()),
                message,
            },
        }
    }
}
