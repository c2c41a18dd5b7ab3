//! SQLite adapter over rusqlite.
//!
//! A single connection serialized behind a `tokio::sync::Mutex`, which is
//! sufficient for the file / in-memory use case. Booleans are stored as
//! INTEGER; `last_insert_rowid` supplies insert identity.

use super::{Driver, ExecResult, Row};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use std::time::Instant;
use tokio::sync::Mutex;

pub struct SqliteDriver {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver").finish()
    }
}

impl SqliteDriver {
    /// Open from a `sqlite:` URL. `sqlite::memory:` (or an empty path) opens
    /// an in-memory database.
    pub fn connect(database_url: &str) -> Result<Self> {
        let path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);
        if path.is_empty() || path == ":memory:" {
            Self::open_in_memory()
        } else {
            let conn =
                Connection::open(path).map_err(|e| Error::ConnectionFailed(e.to_string()))?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let started = Instant::now();
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql).map_err(map_err)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter().map(to_sqlite)))
            .map_err(map_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_err)? {
            let mut record = Row::new();
            for (i, name) in names.iter().enumerate() {
                let value = row.get_ref(i).map_err(map_err)?;
                record.insert(name.clone(), from_sqlite(value));
            }
            out.push(record);
        }
        tracing::debug!(
            target: "rekord::sql",
            sql,
            params = params.len(),
            rows = out.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query"
        );
        Ok(out)
    }

    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        let started = Instant::now();
        let conn = self.conn.lock().await;
        let affected = conn
            .execute(sql, rusqlite::params_from_iter(params.iter().map(to_sqlite)))
            .map_err(map_err)?;
        let last_id = conn.last_insert_rowid();
        tracing::debug!(
            target: "rekord::sql",
            sql,
            params = params.len(),
            affected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "exec"
        );
        Ok(ExecResult {
            affected: affected as u64,
            last_id: (last_id != 0).then_some(last_id),
        })
    }

    async fn exec_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(sql).map_err(map_err)
    }

    async fn close(&self) -> Result<()> {
        // The connection closes when the driver drops.
        Ok(())
    }
}

fn to_sqlite(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else if let Some(f) = n.as_f64() {
                Sql::Real(f)
            } else {
                Sql::Text(n.to_string())
            }
        }
        Value::String(s) => Sql::Text(s.clone()),
        // Structured values persist as their JSON text
        other => Sql::Text(other.to_string()),
    }
}

fn from_sqlite(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

fn map_err(e: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(ffi_err, ref message) = e {
        if ffi_err.code == rusqlite::ErrorCode::OperationInterrupted {
            return Error::Cancelled;
        }
        let text = message.clone().unwrap_or_else(|| e.to_string());
        if ffi_err.code == rusqlite::ErrorCode::ConstraintViolation {
            if text.contains("UNIQUE") {
                return Error::UniqueViolation(text);
            }
            if text.contains("FOREIGN KEY") {
                return Error::ForeignKeyViolation(text);
            }
        }
        return Error::Query {
            code: Some(ffi_err.extended_code.to_string()),
            message: text,
        };
    }
    Error::query(e.to_string())
}
