//! Dialect variation points.
//!
//! The IR compiler emits neutral `?` placeholders; everything that differs
//! between the three supported databases lives here: placeholder style,
//! migration-tracking DDL, catalog listing and table dropping for
//! `migrate::fresh`.

/// The SQL dialect a driver speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl Dialect {
    /// Dialect name as used in connection URL schemes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
        }
    }

    /// Rewrite neutral `?` placeholders into the dialect's native style.
    ///
    /// MySQL and SQLite consume `?` directly; PostgreSQL needs `$1, $2, …`
    /// numbered left to right. Question marks inside single-quoted string
    /// literals are left alone.
    pub fn bind_placeholders(&self, sql: &str) -> String {
        match self {
            Dialect::Sqlite | Dialect::Mysql => sql.to_string(),
            Dialect::Postgres => number_placeholders(sql),
        }
    }

    /// DDL for the migration tracking table.
    pub fn migrations_table_ddl(&self, table: &str) -> String {
        match self {
            Dialect::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 migration TEXT NOT NULL, \
                 batch INTEGER NOT NULL, \
                 created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)"
            ),
            Dialect::Postgres => format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 id BIGSERIAL PRIMARY KEY, \
                 migration TEXT NOT NULL, \
                 batch INTEGER NOT NULL, \
                 created_at TIMESTAMP DEFAULT NOW())"
            ),
            Dialect::Mysql => format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 id BIGINT AUTO_INCREMENT PRIMARY KEY, \
                 migration TEXT NOT NULL, \
                 batch INTEGER NOT NULL, \
                 created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)"
            ),
        }
    }

    /// Catalog query listing user tables, one `name` column per row.
    pub fn list_tables_sql(&self) -> &'static str {
        match self {
            Dialect::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'"
            }
            Dialect::Postgres => {
                "SELECT tablename AS name FROM pg_tables WHERE schemaname = 'public'"
            }
            Dialect::Mysql => {
                "SELECT table_name AS name FROM information_schema.tables \
                 WHERE table_schema = DATABASE()"
            }
        }
    }

    /// DROP statement for one table.
    ///
    /// Postgres cascades so drop order does not matter; MySQL drops run with
    /// foreign key checks disabled by the caller.
    pub fn drop_table_sql(&self, table: &str) -> String {
        match self {
            Dialect::Postgres => format!("DROP TABLE IF EXISTS {table} CASCADE"),
            Dialect::Sqlite | Dialect::Mysql => format!("DROP TABLE IF EXISTS {table}"),
        }
    }
}

/// Split a multi-statement script on top-level `;` boundaries.
///
/// Tracks single-, double- and backtick-quoted runs (with backslash and
/// doubled-quote escapes), `--` and `#` line comments, and `/* */` block
/// comments, so a `;` inside any of those never splits. Used by adapters
/// whose driver has no native multi-statement execution.
#[cfg_attr(not(feature = "mysql"), allow(dead_code))]
pub(crate) fn split_statements(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' && quote != b'`' {
                        i += 2;
                    } else if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                        } else {
                            i += 1;
                            break;
                        }
                    } else {
                        i += 1;
                    }
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            b';' => {
                statements.push(&sql[start..i]);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    statements.push(&sql[start.min(sql.len())..]);
    statements
        .into_iter()
        .map(str::trim)
        .filter(|s| has_executable_content(s))
        .collect()
}

/// True when anything other than whitespace and comments remains. Fragments
/// that fail this (e.g. a trailing `-- done`) would be rejected by the
/// server as empty queries.
fn has_executable_content(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            _ => return true,
        }
    }
    false
}

fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0usize;
    let mut in_string = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                out.push(ch);
            }
            '?' if !in_string => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            _ => out.push(ch),
        }
    }
    out
}
