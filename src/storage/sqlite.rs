//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::site::Region;
use crate::state::Checkpoint;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{FailureRecord, FailureScope, RunRecord, RunStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the state store at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

const RUN_COLUMNS: &str = "id, crawl_id, started_at, finished_at, config_hash, status";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        crawl_id: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(5)?).unwrap_or(RunStatus::Running),
    })
}

fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("Bad timestamp '{}': {}", raw, e)))
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, crawl_id: &str, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (crawl_id, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![crawl_id, now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], run_from_row)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self, crawl_id: &str) -> StorageResult<Option<RunRecord>> {
        let sql = format!(
            "SELECT {} FROM runs WHERE crawl_id = ?1 ORDER BY id DESC LIMIT 1",
            RUN_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![crawl_id], run_from_row)
            .optional()?)
    }

    fn list_runs(&self, crawl_id: &str) -> StorageResult<Vec<RunRecord>> {
        let sql = format!("SELECT {} FROM runs WHERE crawl_id = ?1 ORDER BY id", RUN_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let runs = stmt
            .query_map(params![crawl_id], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let finished_at = if status == RunStatus::Running {
            None
        } else {
            Some(Utc::now().to_rfc3339())
        };

        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), finished_at, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Seen Keys =====

    fn insert_seen(&mut self, crawl_id: &str, key: &str) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO seen_urls (crawl_id, url_key, first_seen_at)
             VALUES (?1, ?2, ?3)",
            params![crawl_id, key, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    fn insert_seen_batch(&mut self, crawl_id: &str, keys: &[String]) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO seen_urls (crawl_id, url_key, first_seen_at)
                 VALUES (?1, ?2, ?3)",
            )?;
            for key in keys {
                inserted += stmt.execute(params![crawl_id, key, now])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn load_seen(&self, crawl_id: &str) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url_key FROM seen_urls WHERE crawl_id = ?1")?;
        let keys = stmt
            .query_map(params![crawl_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn count_seen(&self, crawl_id: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM seen_urls WHERE crawl_id = ?1",
            params![crawl_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Checkpoints =====

    fn save_checkpoint(
        &mut self,
        crawl_id: &str,
        run_id: i64,
        checkpoint: &Checkpoint,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO checkpoints
             (crawl_id, county_locator, page_number, county_name, district_name,
              district_locator, run_id, written_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                crawl_id,
                checkpoint.county.locator,
                checkpoint.page_number,
                checkpoint.county.name,
                checkpoint.district.name,
                checkpoint.district.locator,
                run_id,
                checkpoint.written_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_completed_pages(&self, crawl_id: &str) -> StorageResult<Vec<(String, u32)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT county_locator, page_number FROM checkpoints WHERE crawl_id = ?1")?;
        let pages = stmt
            .query_map(params![crawl_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(String, u32)>, _>>()?;
        Ok(pages)
    }

    fn load_pending_run_pages(&self, crawl_id: &str) -> StorageResult<Vec<(String, u32)>> {
        let mut stmt = self.conn.prepare(
            "SELECT county_locator, page_number FROM checkpoints
             WHERE crawl_id = ?1
               AND run_id > COALESCE(
                   (SELECT MAX(id) FROM runs WHERE crawl_id = ?1 AND status = 'completed'),
                   0
               )",
        )?;
        let pages = stmt
            .query_map(params![crawl_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(String, u32)>, _>>()?;
        Ok(pages)
    }

    fn latest_checkpoint(&self, crawl_id: &str) -> StorageResult<Option<Checkpoint>> {
        let row = self
            .conn
            .query_row(
                "SELECT district_name, district_locator, county_name, county_locator,
                        page_number, written_at
                 FROM checkpoints WHERE crawl_id = ?1
                 ORDER BY rowid DESC LIMIT 1",
                params![crawl_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((district, district_locator, county, county_locator, page, written)) = row else {
            return Ok(None);
        };
        Ok(Some(Checkpoint {
            district: Region::new(district, district_locator),
            county: Region::new(county, county_locator),
            page_number: page,
            written_at: parse_timestamp(&written)?,
        }))
    }

    // ===== Failures =====

    fn record_failure(
        &mut self,
        crawl_id: &str,
        run_id: i64,
        scope: FailureScope,
        url: &str,
        message: &str,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO failures (crawl_id, run_id, scope, url, message, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                crawl_id,
                run_id,
                scope.to_db_string(),
                url,
                message,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn get_failures(&self, run_id: i64) -> StorageResult<Vec<FailureRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, scope, url, message, occurred_at FROM failures
             WHERE run_id = ?1 ORDER BY id",
        )?;
        let failures = stmt
            .query_map(params![run_id], |row| {
                Ok(FailureRecord {
                    run_id: row.get(0)?,
                    scope: FailureScope::from_db_string(&row.get::<_, String>(1)?)
                        .unwrap_or(FailureScope::Record),
                    url: row.get(2)?,
                    message: row.get(3)?,
                    occurred_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(failures)
    }

    fn count_failures_by_scope(&self, run_id: i64) -> StorageResult<HashMap<FailureScope, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT scope, COUNT(*) FROM failures WHERE run_id = ?1 GROUP BY scope")?;

        let mut summary = HashMap::new();
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (scope, count) = row?;
            if let Some(scope) = FailureScope::from_db_string(&scope) {
                summary.insert(scope, count as u64);
            }
        }
        Ok(summary)
    }

    // ===== Maintenance =====

    fn reset_crawl(&mut self, crawl_id: &str) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM seen_urls WHERE crawl_id = ?1", params![crawl_id])?;
        tx.execute("DELETE FROM checkpoints WHERE crawl_id = ?1", params![crawl_id])?;
        tx.execute("DELETE FROM failures WHERE crawl_id = ?1", params![crawl_id])?;
        tx.commit()?;
        Ok(())
    }
}
