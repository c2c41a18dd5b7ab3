//! Driver adapters: the injected capability that executes parameterized SQL.
//!
//! The core talks to storage exclusively through the object-safe [`Driver`]
//! trait. Adapters translate the neutral `?` placeholder stream into their
//! dialect's native style, normalize result rows into ordered
//! `column → Value` maps, and report last-insert identity and affected-row
//! counts.
//!
//! One adapter exists per enabled cargo feature: `sqlite` (rusqlite, a single
//! in-process connection serialized behind an async mutex), `postgres`
//! (tokio-postgres, a single async client) and `mysql` (mysql_async with its
//! built-in pool). Connecting to a scheme whose feature is compiled out
//! fails with [`Error::DriverUnavailable`] naming the missing backing crate.

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::value::Attributes;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A normalized result row: ordered column name → value map.
pub type Row = Attributes;

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecResult {
    /// Rows affected by the statement.
    pub affected: u64,
    /// Last inserted key, when the dialect reports one.
    pub last_id: Option<i64>,
}

/// Capability to execute parameterized SQL against one database.
///
/// Implementations must be safe for concurrent callers: the MySQL adapter
/// pools connections, the single-connection adapters serialize requests
/// internally.
#[async_trait]
pub trait Driver: Send + Sync + std::fmt::Debug {
    /// The SQL dialect this driver speaks.
    fn dialect(&self) -> Dialect;

    /// Execute a statement and return all result rows.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement and report affected rows and last-insert identity.
    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult>;

    /// Execute an INSERT, reporting the value of the `key` column for the
    /// inserted row where the dialect needs special handling (PostgreSQL
    /// appends `RETURNING *`). The default defers to [`Driver::exec`].
    async fn insert(&self, sql: &str, params: &[Value], key: &str) -> Result<ExecResult> {
        let _ = key;
        self.exec(sql, params).await
    }

    /// Execute a multi-statement script (migration units).
    async fn exec_batch(&self, sql: &str) -> Result<()>;

    /// Release the underlying connection(s).
    async fn close(&self) -> Result<()>;
}

/// Open a driver from a database URL.
///
/// The scheme selects the adapter: `sqlite::memory:` / `sqlite://path`,
/// `postgres://…`, `mysql://…`.
pub async fn connect(database_url: &str) -> Result<Arc<dyn Driver>> {
    let scheme = match url::Url::parse(database_url) {
        Ok(parsed) => parsed.scheme().to_ascii_lowercase(),
        Err(e) => {
            return Err(Error::ConnectionFailed(format!(
                "invalid database URL: {e}"
            )));
        }
    };
    match scheme.as_str() {
        "sqlite" => {
            #[cfg(feature = "sqlite")]
            {
                Ok(Arc::new(sqlite::SqliteDriver::connect(database_url)?))
            }
            #[cfg(not(feature = "sqlite"))]
            {
                Err(Error::DriverUnavailable {
                    feature: "sqlite",
                    package: "rusqlite",
                })
            }
        }
        "postgres" | "postgresql" => {
            #[cfg(feature = "postgres")]
            {
                Ok(Arc::new(postgres::PostgresDriver::connect(database_url).await?))
            }
            #[cfg(not(feature = "postgres"))]
            {
                Err(Error::DriverUnavailable {
                    feature: "postgres",
                    package: "tokio-postgres",
                })
            }
        }
        "mysql" => {
            #[cfg(feature = "mysql")]
            {
                Ok(Arc::new(mysql::MysqlDriver::connect(database_url)?))
            }
            #[cfg(not(feature = "mysql"))]
            {
                Err(Error::DriverUnavailable {
                    feature: "mysql",
                    package: "mysql_async",
                })
            }
        }
        other => Err(Error::ConnectionFailed(format!(
            "unrecognized database URL scheme '{other}'"
        ))),
    }
}
