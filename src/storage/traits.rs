//! Storage traits and error types
//!
//! This module defines the trait interface for the crawl state store and
//! associated error types. Every operation is scoped by a crawl identity
//! (`site:city:category`) so one database can hold several crawls.

use crate::state::Checkpoint;
use crate::storage::{FailureRecord, FailureScope, RunRecord, RunStatus};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for state store implementations
///
/// The store outlives a single run: it keeps the seen keys, the completed
/// pages and the failure log of every run of a crawl.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new run for a crawl
    ///
    /// # Arguments
    ///
    /// * `crawl_id` - Crawl identity the run belongs to
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, crawl_id: &str, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run of a crawl
    fn get_latest_run(&self, crawl_id: &str) -> StorageResult<Option<RunRecord>>;

    /// Lists all runs of a crawl, oldest first
    fn list_runs(&self, crawl_id: &str) -> StorageResult<Vec<RunRecord>>;

    /// Updates the status of a run and stamps its finish time when terminal
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Seen Keys =====

    /// Records a persisted dedup key
    ///
    /// Returns true if the key was not stored yet.
    fn insert_seen(&mut self, crawl_id: &str, key: &str) -> StorageResult<bool>;

    /// Records many keys in one transaction; returns how many were new
    fn insert_seen_batch(&mut self, crawl_id: &str, keys: &[String]) -> StorageResult<usize>;

    /// Loads every seen key of a crawl
    fn load_seen(&self, crawl_id: &str) -> StorageResult<Vec<String>>;

    /// Counts seen keys of a crawl
    fn count_seen(&self, crawl_id: &str) -> StorageResult<u64>;

    // ===== Checkpoints =====

    /// Records a completed listing page
    fn save_checkpoint(
        &mut self,
        crawl_id: &str,
        run_id: i64,
        checkpoint: &Checkpoint,
    ) -> StorageResult<()>;

    /// Loads `(county locator, page number)` of every completed page
    fn load_completed_pages(&self, crawl_id: &str) -> StorageResult<Vec<(String, u32)>>;

    /// Loads the pages completed since the last completed run
    ///
    /// These are the pages an unfinished run does not need to fetch again.
    fn load_pending_run_pages(&self, crawl_id: &str) -> StorageResult<Vec<(String, u32)>>;

    /// Gets the most recently written checkpoint
    fn latest_checkpoint(&self, crawl_id: &str) -> StorageResult<Option<Checkpoint>>;

    // ===== Failures =====

    /// Logs a skipped county, page or record
    fn record_failure(
        &mut self,
        crawl_id: &str,
        run_id: i64,
        scope: FailureScope,
        url: &str,
        message: &str,
    ) -> StorageResult<()>;

    /// Gets the failures logged by one run
    fn get_failures(&self, run_id: i64) -> StorageResult<Vec<FailureRecord>>;

    /// Counts the failures of one run by scope
    fn count_failures_by_scope(&self, run_id: i64) -> StorageResult<HashMap<FailureScope, u64>>;

    // ===== Maintenance =====

    /// Forgets the progress of a crawl (seen keys, checkpoints, failures)
    ///
    /// Run history is kept.
    fn reset_crawl(&mut self, crawl_id: &str) -> StorageResult<()>;
}
