//! MySQL adapter over mysql_async.
//!
//! Uses the crate's built-in connection pool, so the adapter is safe for
//! concurrent callers without extra serialization. Booleans travel as
//! TINYINT(1); `last_insert_id` supplies insert identity.

use super::{Driver, ExecResult, Row};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Opts, Params, Pool};
use serde_json::Value;
use std::time::Instant;

pub struct MysqlDriver {
    pool: Pool,
}

impl std::fmt::Debug for MysqlDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlDriver").finish()
    }
}

impl MysqlDriver {
    /// Build the pool from a `mysql://` URL. Connections are established
    /// lazily on first use.
    pub fn connect(database_url: &str) -> Result<Self> {
        let opts =
            Opts::from_url(database_url).map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            pool: Pool::new(opts),
        })
    }
}

#[async_trait]
impl Driver for MysqlDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let started = Instant::now();
        let mut conn = self.pool.get_conn().await.map_err(map_err)?;
        let rows: Vec<mysql_async::Row> = conn
            .exec(sql, to_params(params))
            .await
            .map_err(map_err)?;
        let mut out = Vec::with_capacity(rows.len());
        for mut row in rows {
            let columns = row.columns();
            let mut record = Row::new();
            for (i, column) in columns.iter().enumerate() {
                let value = row.take::<mysql_async::Value, _>(i).unwrap_or(mysql_async::Value::NULL);
                record.insert(column.name_str().into_owned(), from_mysql(value));
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
        let mut conn = self.pool.get_conn().await.map_err(map_err)?;
        conn.exec_drop(sql, to_params(params))
            .await
            .map_err(map_err)?;
        let affected = conn.affected_rows();
        let last_id = conn.last_insert_id().map(|id| id as i64);
        tracing::debug!(
            target: "rekord::sql",
            sql,
            params = params.len(),
            affected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "exec"
        );
        Ok(ExecResult { affected, last_id })
    }

    async fn exec_batch(&self, sql: &str) -> Result<()> {
        let mut conn = self.pool.get_conn().await.map_err(map_err)?;
        for statement in crate::dialect::split_statements(sql) {
            conn.query_drop(statement).await.map_err(map_err)?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.clone().disconnect().await.map_err(map_err)
    }
}

fn to_params(params: &[Value]) -> Params {
    if params.is_empty() {
        return Params::Empty;
    }
    Params::Positional(params.iter().map(to_mysql).collect())
}

fn to_mysql(value: &Value) -> mysql_async::Value {
    use mysql_async::Value as Sql;
    match value {
        Value::Null => Sql::NULL,
        Value::Bool(b) => Sql::Int(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Int(i)
            } else if let Some(u) = n.as_u64() {
                Sql::UInt(u)
            } else {
                Sql::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => Sql::Bytes(s.clone().into_bytes()),
        other => Sql::Bytes(other.to_string().into_bytes()),
    }
}

fn from_mysql(value: mysql_async::Value) -> Value {
    use mysql_async::Value as Sql;
    match value {
        Sql::NULL => Value::Null,
        Sql::Bytes(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        Sql::Int(i) => Value::from(i),
        Sql::UInt(u) => Value::from(u),
        Sql::Float(f) => Value::from(f as f64),
        Sql::Double(d) => Value::from(d),
        Sql::Date(y, m, d, hh, mm, ss, _us) => Value::String(format!(
            "{y:04}-{m:02}-{d:02}T{hh:02}:{mm:02}:{ss:02}Z"
        )),
        Sql::Time(neg, days, hh, mm, ss, _us) => {
            let sign = if neg { "-" } else { "" };
            let hours = u32::from(hh) + days * 24;
            Value::String(format!("{sign}{hours:02}:{mm:02}:{ss:02}"))
        }
    }
}

fn map_err(e: mysql_async::Error) -> Error {
    if let mysql_async::Error::Server(ref server) = e {
        return Error::from_dialect_code(&server.code.to_string(), server.message.clone());
    }
    Error::query(e.to_string())
}
