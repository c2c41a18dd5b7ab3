//! PostgreSQL adapter over tokio-postgres.
//!
//! A single async client. Neutral `?` placeholders are rewritten to `$n`
//! before preparation; parameters are converted according to the prepared
//! statement's parameter types, so dynamic JSON scalars bind correctly
//! against typed columns (int, bool, timestamp, json). INSERT statements
//! gain `RETURNING *` and the key column of the first returned row supplies
//! insert identity.

use super::{Driver, ExecResult, Row};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::value::truthy;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::time::Instant;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Statement};

pub struct PostgresDriver {
    client: Client,
}

impl std::fmt::Debug for PostgresDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDriver").finish()
    }
}

type BoxedParam = Box<dyn ToSql + Send + Sync>;

impl PostgresDriver {
    /// Connect and spawn the connection driver task.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(target: "rekord::sql", error = %e, "postgres connection ended");
            }
        });
        Ok(Self { client })
    }

    async fn prepare(&self, sql: &str, params: &[Value]) -> Result<(Statement, Vec<BoxedParam>)> {
        let rewritten = Dialect::Postgres.bind_placeholders(sql);
        let stmt = self.client.prepare(&rewritten).await.map_err(map_err)?;
        let types = stmt.params();
        if types.len() != params.len() {
            return Err(Error::query(format!(
                "statement expects {} parameters, got {}",
                types.len(),
                params.len()
            )));
        }
        let mut converted = Vec::with_capacity(params.len());
        for (value, ty) in params.iter().zip(types) {
            converted.push(bind_param(value, ty)?);
        }
        Ok((stmt, converted))
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let started = Instant::now();
        let (stmt, converted) = self.prepare(sql, params).await?;
        let refs: Vec<&(dyn ToSql + Sync)> =
            converted.iter().map(|p| &**p as &(dyn ToSql + Sync)).collect();
        let rows = self.client.query(&stmt, &refs).await.map_err(map_err)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(row_to_record(row)?);
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
        let (stmt, converted) = self.prepare(sql, params).await?;
        let refs: Vec<&(dyn ToSql + Sync)> =
            converted.iter().map(|p| &**p as &(dyn ToSql + Sync)).collect();
        let affected = self.client.execute(&stmt, &refs).await.map_err(map_err)?;
        tracing::debug!(
            target: "rekord::sql",
            sql,
            params = params.len(),
            affected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "exec"
        );
        Ok(ExecResult {
            affected,
            last_id: None,
        })
    }

    async fn insert(&self, sql: &str, params: &[Value], key: &str) -> Result<ExecResult> {
        let returning = format!("{sql} RETURNING *");
        let rows = self.query(&returning, params).await?;
        let last_id = rows
            .first()
            .and_then(|row| row.get(key))
            .and_then(Value::as_i64);
        Ok(ExecResult {
            affected: rows.len() as u64,
            last_id,
        })
    }

    async fn exec_batch(&self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql).await.map_err(map_err)
    }

    async fn close(&self) -> Result<()> {
        // The client closes when the driver drops.
        Ok(())
    }
}

fn bind_param(value: &Value, ty: &Type) -> Result<BoxedParam> {
    if value.is_null() {
        return Ok(null_param(ty));
    }
    let out: BoxedParam = if *ty == Type::BOOL {
        Box::new(truthy(value))
    } else if *ty == Type::INT2 {
        Box::new(int_param(value)? as i16)
    } else if *ty == Type::INT4 {
        Box::new(int_param(value)? as i32)
    } else if *ty == Type::INT8 {
        Box::new(int_param(value)?)
    } else if *ty == Type::FLOAT4 {
        Box::new(float_param(value)? as f32)
    } else if *ty == Type::FLOAT8 {
        Box::new(float_param(value)?)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        Box::new(value.clone())
    } else if *ty == Type::TIMESTAMP {
        Box::new(naive_datetime_param(value)?)
    } else if *ty == Type::TIMESTAMPTZ {
        Box::new(naive_datetime_param(value)?.and_utc())
    } else if *ty == Type::DATE {
        Box::new(date_param(value)?)
    } else {
        Box::new(text_param(value))
    };
    Ok(out)
}

fn null_param(ty: &Type) -> BoxedParam {
    if *ty == Type::BOOL {
        Box::new(None::<bool>)
    } else if *ty == Type::INT2 {
        Box::new(None::<i16>)
    } else if *ty == Type::INT4 {
        Box::new(None::<i32>)
    } else if *ty == Type::INT8 {
        Box::new(None::<i64>)
    } else if *ty == Type::FLOAT4 {
        Box::new(None::<f32>)
    } else if *ty == Type::FLOAT8 {
        Box::new(None::<f64>)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        Box::new(None::<Value>)
    } else if *ty == Type::TIMESTAMP {
        Box::new(None::<NaiveDateTime>)
    } else if *ty == Type::TIMESTAMPTZ {
        Box::new(None::<DateTime<Utc>>)
    } else if *ty == Type::DATE {
        Box::new(None::<NaiveDate>)
    } else {
        Box::new(None::<String>)
    }
}

fn int_param(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| Error::query(format!("{n} out of integer range"))),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| Error::query(format!("'{s}' is not an integer"))),
        Value::Bool(b) => Ok(*b as i64),
        other => Err(Error::query(format!("cannot bind {other} as integer"))),
    }
}

fn float_param(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::query(format!("{n} is not a float"))),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| Error::query(format!("'{s}' is not a float"))),
        other => Err(Error::query(format!("cannot bind {other} as float"))),
    }
}

fn text_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn naive_datetime_param(value: &Value) -> Result<NaiveDateTime> {
    let Value::String(s) = value else {
        return Err(Error::query(format!("cannot bind {value} as timestamp")));
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive);
        }
    }
    Err(Error::query(format!("'{s}' is not a timestamp")))
}

fn date_param(value: &Value) -> Result<NaiveDate> {
    let Value::String(s) = value else {
        return Err(Error::query(format!("cannot bind {value} as date")));
    };
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| Error::query(format!("'{s}' is not a date")))
}

fn row_to_record(row: &tokio_postgres::Row) -> Result<Row> {
    let mut record = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        record.insert(column.name().to_string(), cell_value(row, idx, column.type_())?);
    }
    Ok(record)
}

fn cell_value(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Result<Value> {
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx).map(json_opt)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx).map(json_opt)
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx).map(json_opt)
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx).map(json_opt)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx).map(json_opt)
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx).map(json_opt)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<Value>>(idx)
            .map(|v| v.unwrap_or(Value::Null))
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx).map(|v| {
            v.map(|dt| {
                Value::String(
                    dt.and_utc()
                        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                )
            })
            .unwrap_or(Value::Null)
        })
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx).map(|v| {
            v.map(|dt| Value::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)))
                .unwrap_or(Value::Null)
        })
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(idx)
            .map(|v| v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null))
    } else {
        match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => Ok(json_opt(v)),
            Err(_) => {
                tracing::warn!(
                    target: "rekord::sql",
                    column = idx,
                    column_type = %ty,
                    "unmapped column type, reading as NULL"
                );
                Ok(Value::Null)
            }
        }
    };
    value.map_err(|e| Error::query(e.to_string()))
}

fn json_opt<T: Into<Value>>(v: Option<T>) -> Value {
    v.map(Into::into).unwrap_or(Value::Null)
}

fn map_err(e: tokio_postgres::Error) -> Error {
    if let Some(db) = e.as_db_error() {
        return Error::from_dialect_code(db.code().code(), db.message().to_string());
    }
    Error::query(e.to_string())
}
