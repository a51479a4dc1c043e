//! Database schema definitions
//!
//! This module contains the SQL schema of the crawl state store.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawl_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_crawl ON runs(crawl_id);

-- Dedup keys of persisted records
CREATE TABLE IF NOT EXISTS seen_urls (
    crawl_id TEXT NOT NULL,
    url_key TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    PRIMARY KEY (crawl_id, url_key)
);

-- One row per completed listing page
CREATE TABLE IF NOT EXISTS checkpoints (
    crawl_id TEXT NOT NULL,
    county_locator TEXT NOT NULL,
    page_number INTEGER NOT NULL,
    county_name TEXT NOT NULL,
    district_name TEXT NOT NULL,
    district_locator TEXT NOT NULL,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    written_at TEXT NOT NULL,
    PRIMARY KEY (crawl_id, county_locator, page_number)
);

-- Skipped counties, pages and records
CREATE TABLE IF NOT EXISTS failures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawl_id TEXT NOT NULL,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    scope TEXT NOT NULL,
    url TEXT NOT NULL,
    message TEXT NOT NULL,
    occurred_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_failures_run ON failures(run_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
