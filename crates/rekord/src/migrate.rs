//! Batch-tracked SQL migrations.
//!
//! Units live in a directory as `<id>.up.sql` / `<id>.down.sql` pairs (a
//! bare `<id>.sql` is an up-only unit); the identifier is expected to carry
//! a lexicographically sortable timestamp prefix, e.g.
//! `20250101_create_users.up.sql`. Applied units are recorded in a
//! `migrations(id, migration, batch, created_at)` table, created lazily;
//! every `run` stamps the units it applies with a fresh batch number and
//! rollback acts on whole batches.
//!
//! A failing unit stops the current batch; units applied before it stay
//! recorded, so a subsequent `run` resumes with the remainder.

use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::value::now;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MIGRATIONS_TABLE: &str = "migrations";

/// Migration unit on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskUnit {
    pub id: String,
    pub up_path: PathBuf,
    pub down_path: Option<PathBuf>,
}

/// One line of `status()` output.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UnitStatus {
    pub id: String,
    pub ran: bool,
    pub batch: Option<i64>,
}

/// Computed status for a directory + database.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationStatus {
    pub units: Vec<UnitStatus>,
}

#[derive(Debug, Clone)]
struct AppliedRow {
    row_id: i64,
    migration: String,
    batch: i64,
}

/// Applies and reverts migration units against one driver.
pub struct Migrator {
    driver: Arc<dyn Driver>,
    dir: PathBuf,
}

impl Migrator {
    pub fn new(driver: Arc<dyn Driver>, dir: impl AsRef<Path>) -> Self {
        Self {
            driver,
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Apply every pending unit in file order under a fresh batch number.
    /// Returns the applied identifiers. Running twice with no new files is
    /// a no-op.
    pub async fn run(&self) -> Result<Vec<String>> {
        self.ensure_table().await?;
        let units = scan_units_dir(&self.dir)?;
        let applied = self.fetch_applied().await?;
        let applied_ids: HashSet<&str> = applied.iter().map(|r| r.migration.as_str()).collect();
        let batch = applied.iter().map(|r| r.batch).max().unwrap_or(0) + 1;

        let mut done = Vec::new();
        for unit in units {
            if applied_ids.contains(unit.id.as_str()) {
                continue;
            }
            let sql = read_unit_file(&unit.id, &unit.up_path)?;
            self.driver
                .exec_batch(&sql)
                .await
                .map_err(|e| Error::migration(&unit.id, e.to_string()))?;
            self.record(&unit.id, batch).await?;
            tracing::info!(target: "rekord::migrate", unit = %unit.id, batch, "applied");
            done.push(unit.id);
        }
        Ok(done)
    }

    /// Revert the last `steps` batches, newest unit first. Returns the
    /// reverted identifiers.
    pub async fn rollback(&self, steps: usize) -> Result<Vec<String>> {
        if steps == 0 {
            return Ok(Vec::new());
        }
        self.ensure_table().await?;
        let applied = self.fetch_applied().await?;
        let Some(max_batch) = applied.iter().map(|r| r.batch).max() else {
            return Ok(Vec::new());
        };
        let cutoff = max_batch - (steps as i64 - 1);
        let targets: Vec<&AppliedRow> = applied
            .iter()
            .rev()
            .filter(|r| r.batch >= cutoff)
            .collect();
        self.revert(&targets).await
    }

    /// Revert every applied unit, newest first.
    pub async fn reset(&self) -> Result<Vec<String>> {
        self.ensure_table().await?;
        let applied = self.fetch_applied().await?;
        let targets: Vec<&AppliedRow> = applied.iter().rev().collect();
        self.revert(&targets).await
    }

    /// `reset` then `run`.
    pub async fn refresh(&self) -> Result<Vec<String>> {
        self.reset().await?;
        self.run().await
    }

    /// Drop every table reported by the dialect catalog, then `run`.
    pub async fn fresh(&self) -> Result<Vec<String>> {
        let dialect = self.driver.dialect();
        let rows = self.driver.query(dialect.list_tables_sql(), &[]).await?;
        let tables: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();
        if dialect == crate::dialect::Dialect::Mysql {
            self.driver.exec("SET FOREIGN_KEY_CHECKS = 0", &[]).await?;
        }
        for table in &tables {
            self.driver.exec(&dialect.drop_table_sql(table), &[]).await?;
        }
        if dialect == crate::dialect::Dialect::Mysql {
            self.driver.exec("SET FOREIGN_KEY_CHECKS = 1", &[]).await?;
        }
        self.run().await
    }

    /// Every unit on disk annotated `Ran | Pending` (with its batch when
    /// ran).
    pub async fn status(&self) -> Result<MigrationStatus> {
        self.ensure_table().await?;
        let units = scan_units_dir(&self.dir)?;
        let applied = self.fetch_applied().await?;
        let batches: HashMap<&str, i64> = applied
            .iter()
            .map(|r| (r.migration.as_str(), r.batch))
            .collect();
        Ok(MigrationStatus {
            units: units
                .into_iter()
                .map(|unit| {
                    let batch = batches.get(unit.id.as_str()).copied();
                    UnitStatus {
                        ran: batch.is_some(),
                        batch,
                        id: unit.id,
                    }
                })
                .collect(),
        })
    }

    async fn revert(&self, targets: &[&AppliedRow]) -> Result<Vec<String>> {
        let units = scan_units_dir(&self.dir)?;
        let by_id: HashMap<&str, &DiskUnit> =
            units.iter().map(|u| (u.id.as_str(), u)).collect();
        let mut done = Vec::new();
        for row in targets {
            let unit = by_id.get(row.migration.as_str()).ok_or_else(|| {
                Error::migration(&row.migration, "migration file not found in local directory")
            })?;
            let down_path = unit.down_path.as_ref().ok_or_else(|| {
                Error::migration(&row.migration, "missing down migration (.down.sql)")
            })?;
            let sql = read_unit_file(&row.migration, down_path)?;
            self.driver
                .exec_batch(&sql)
                .await
                .map_err(|e| Error::migration(&row.migration, e.to_string()))?;
            self.driver
                .exec(
                    &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE id = ?"),
                    &[Value::from(row.row_id)],
                )
                .await?;
            tracing::info!(target: "rekord::migrate", unit = %row.migration, "reverted");
            done.push(row.migration.clone());
        }
        Ok(done)
    }

    async fn ensure_table(&self) -> Result<()> {
        let ddl = self.driver.dialect().migrations_table_ddl(MIGRATIONS_TABLE);
        self.driver.exec_batch(&ddl).await
    }

    async fn fetch_applied(&self) -> Result<Vec<AppliedRow>> {
        let rows = self
            .driver
            .query(
                &format!("SELECT id, migration, batch FROM {MIGRATIONS_TABLE} ORDER BY id ASC"),
                &[],
            )
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let row_id = row.get("id").and_then(Value::as_i64).unwrap_or_default();
            let migration = row
                .get("migration")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let batch = row.get("batch").and_then(Value::as_i64).unwrap_or_default();
            out.push(AppliedRow {
                row_id,
                migration,
                batch,
            });
        }
        Ok(out)
    }

    async fn record(&self, id: &str, batch: i64) -> Result<()> {
        self.driver
            .exec(
                &format!(
                    "INSERT INTO {MIGRATIONS_TABLE} (migration, batch, created_at) VALUES (?, ?, ?)"
                ),
                &[Value::from(id), Value::from(batch), now()],
            )
            .await?;
        Ok(())
    }
}

fn read_unit_file(id: &str, path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| Error::migration(id, format!("failed to read {}: {e}", path.display())))
}

#[derive(Debug, Clone, Default)]
struct PartialUnit {
    up_path: Option<PathBuf>,
    down_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitFileKind {
    Up,
    Down,
}

fn parse_unit_filename(file_name: &str) -> Option<(String, UnitFileKind)> {
    if let Some(id) = file_name.strip_suffix(".down.sql") {
        return Some((id.to_string(), UnitFileKind::Down));
    }
    if let Some(id) = file_name.strip_suffix(".up.sql") {
        return Some((id.to_string(), UnitFileKind::Up));
    }
    file_name
        .strip_suffix(".sql")
        .map(|id| (id.to_string(), UnitFileKind::Up))
}

/// Scan a migrations directory into ordered units.
///
/// Identifiers sort lexicographically, so timestamp-prefixed names apply in
/// chronological order.
pub fn scan_units_dir(dir: impl AsRef<Path>) -> Result<Vec<DiskUnit>> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|e| {
        Error::Other(format!("failed to read migrations dir {}: {e}", dir.display()))
    })?;

    let mut by_id: BTreeMap<String, PartialUnit> = BTreeMap::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| Error::Other(format!("failed to read entry in {}: {e}", dir.display())))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some((id, kind)) = parse_unit_filename(file_name) else {
            continue;
        };
        let slot = by_id.entry(id.clone()).or_default();
        match kind {
            UnitFileKind::Up => {
                if slot.up_path.is_some() {
                    return Err(Error::Other(format!("duplicate up migration for '{id}'")));
                }
                slot.up_path = Some(path);
            }
            UnitFileKind::Down => {
                if slot.down_path.is_some() {
                    return Err(Error::Other(format!("duplicate down migration for '{id}'")));
                }
                slot.down_path = Some(path);
            }
        }
    }

    let mut out = Vec::with_capacity(by_id.len());
    for (id, partial) in by_id {
        let Some(up_path) = partial.up_path else {
            return Err(Error::Other(format!(
                "migration '{id}' has a down.sql but no up.sql"
            )));
        };
        out.push(DiskUnit {
            id,
            up_path,
            down_path: partial.down_path,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{UnitFileKind, parse_unit_filename, scan_units_dir};

    #[test]
    fn parse_unit_filename_variants() {
        let (id, kind) = parse_unit_filename("20250101_create_users.up.sql").unwrap();
        assert_eq!(id, "20250101_create_users");
        assert_eq!(kind, UnitFileKind::Up);

        let (id, kind) = parse_unit_filename("20250101_create_users.down.sql").unwrap();
        assert_eq!(id, "20250101_create_users");
        assert_eq!(kind, UnitFileKind::Down);

        let (id, kind) = parse_unit_filename("20250102_add_email.sql").unwrap();
        assert_eq!(id, "20250102_add_email");
        assert_eq!(kind, UnitFileKind::Up);

        assert!(parse_unit_filename("README.md").is_none());
    }

    #[test]
    fn scan_collects_ordered_pairs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("20250102_add_email.up.sql"),
            "ALTER TABLE users ADD COLUMN email TEXT;",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("20250102_add_email.down.sql"),
            "ALTER TABLE users DROP COLUMN email;",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("20250101_create_users.up.sql"),
            "CREATE TABLE users (id INTEGER PRIMARY KEY);",
        )
        .unwrap();

        let units = scan_units_dir(dir.path()).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].id, "20250101_create_users");
        assert!(units[0].down_path.is_none());
        assert_eq!(units[1].id, "20250102_add_email");
        assert!(units[1].down_path.is_some());
    }

    #[test]
    fn scan_rejects_down_without_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20250103_x.down.sql"), "DROP TABLE x;").unwrap();
        let err = scan_units_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no up.sql"));
    }
}
