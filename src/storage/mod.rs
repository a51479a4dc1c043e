//! Storage module for persisting crawl output and progress
//!
//! This module handles:
//! - the append-only JSON-lines output file
//! - the SQLite state store (runs, seen keys, checkpoints, failures)
//! - the dedup sink tying both together

mod jsonl;
mod schema;
mod sink;
mod sqlite;
mod traits;

pub use jsonl::{read_records, scan_output, JsonlWriter, OutputScan};
pub use sink::{AppendOutcome, DedupSink};
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use std::path::Path;

/// Opens or creates the state store
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub crawl_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// A run that stopped before walking everything
    pub fn is_unfinished(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}

/// What a logged failure caused to be skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureScope {
    District,
    County,
    Page,
    Record,
}

impl FailureScope {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::District => "district",
            Self::County => "county",
            Self::Page => "page",
            Self::Record => "record",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "district" => Some(Self::District),
            "county" => Some(Self::County),
            "page" => Some(Self::Page),
            "record" => Some(Self::Record),
            _ => None,
        }
    }
}

/// A logged failure
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub run_id: i64,
    pub scope: FailureScope,
    pub url: String,
    pub message: String,
    pub occurred_at: String,
}
