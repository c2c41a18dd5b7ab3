//! Scripted driver for unit tests.

use crate::dialect::Dialect;
use crate::driver::{Driver, ExecResult, Row};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Records every statement and replays scripted responses in order; queries
/// past the script return no rows. Used to assert emitted SQL and to count
/// driver calls for the bounded-eager-load guarantees.
#[derive(Debug)]
pub(crate) struct MockDriver {
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    query_responses: Mutex<VecDeque<Vec<Row>>>,
    exec_responses: Mutex<VecDeque<ExecResult>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            query_responses: Mutex::new(VecDeque::new()),
            exec_responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_rows(&self, rows: Vec<Row>) {
        self.query_responses.lock().unwrap().push_back(rows);
    }

    pub fn push_exec(&self, result: ExecResult) {
        self.exec_responses.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.calls
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(self
            .query_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        self.calls
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(self
            .exec_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn exec_batch(&self, sql: &str) -> Result<()> {
        self.calls.lock().unwrap().push((sql.to_string(), Vec::new()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Build a row from column/value pairs.
pub(crate) fn row(pairs: &[(&str, Value)]) -> Row {
    let mut out = Row::new();
    for (key, value) in pairs {
        out.insert(key.to_string(), value.clone());
    }
    out
}
