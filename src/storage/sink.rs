//! Dedup & sink: exactly-once appends over the JSON-lines output
//!
//! The sink owns the crawl's mutable state. Workers reach it through one
//! async mutex, so the seen check and the append happen under the same lock.

use crate::site::Record;
use crate::state::{Checkpoint, CrawlState};
use crate::storage::jsonl::{scan_output, JsonlWriter};
use crate::storage::{FailureScope, RunRecord, RunStatus, Storage, StorageError};
use crate::url::dedup_key;
use crate::SinkError;
use std::fs;
use std::path::{Path, PathBuf};

/// Result of an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Written,
    /// The record's key was already persisted; nothing was written
    AlreadySeen,
}

/// Append-only record sink with a persistent seen set
pub struct DedupSink {
    crawl_id: String,
    run_id: Option<i64>,
    writer: JsonlWriter,
    store: Box<dyn Storage + Send>,
    state: CrawlState,
    unfinished_run: Option<RunRecord>,
}

impl DedupSink {
    /// Opens the sink for a crawl
    ///
    /// Loads progress from the store and reconciles it with the output file:
    /// every `sourceUrl` found in the file is treated as seen, so a crash
    /// between writing a line and recording it in the store never produces
    /// a duplicate. A truncated last line is terminated.
    ///
    /// With `fresh`, progress of the crawl is forgotten and an existing output
    /// file is moved aside to `<file>.bak`.
    pub fn open(
        crawl_id: &str,
        output_path: &Path,
        mut store: Box<dyn Storage + Send>,
        fresh: bool,
    ) -> Result<Self, SinkError> {
        if fresh {
            store.reset_crawl(crawl_id)?;
            if output_path.exists() {
                let backup = backup_path(output_path);
                fs::rename(output_path, &backup)?;
                tracing::info!(backup = %backup.display(), "Moved previous output aside");
            }
        }

        let unfinished_run = store
            .get_latest_run(crawl_id)?
            .filter(|run| run.status.is_unfinished());

        let seen = store.load_seen(crawl_id)?.into_iter().collect();
        let completed = store.load_pending_run_pages(crawl_id)?;
        let checkpoint = store.latest_checkpoint(crawl_id)?;
        let mut state = CrawlState::restore(seen, completed, checkpoint);

        let scan = scan_output(output_path)?;
        let file_keys: Vec<String> = scan.source_urls.iter().map(|url| dedup_key(url)).collect();
        let missing: Vec<String> = file_keys
            .iter()
            .filter(|key| !state.is_seen(key))
            .cloned()
            .collect();

        if !missing.is_empty() {
            let added = store.insert_seen_batch(crawl_id, &missing)?;
            tracing::info!(
                reconciled = added,
                "Recovered seen keys from output file that were missing in the state store"
            );
        }
        state.absorb(file_keys);

        let mut writer = JsonlWriter::open(output_path)?;
        if scan.truncated_tail {
            tracing::warn!(
                path = %output_path.display(),
                "Output file ends with a partial line, terminating it"
            );
            writer.terminate_partial_line()?;
        }

        tracing::info!(
            crawl = crawl_id,
            seen = state.seen().len(),
            completed_pages = state.completed_page_count(),
            malformed_lines = scan.malformed,
            "Sink opened"
        );

        Ok(Self {
            crawl_id: crawl_id.to_string(),
            run_id: None,
            writer,
            store,
            state,
            unfinished_run,
        })
    }

    pub fn crawl_id(&self) -> &str {
        &self.crawl_id
    }

    pub fn output_path(&self) -> &Path {
        self.writer.path()
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    pub fn run_id(&self) -> Option<i64> {
        self.run_id
    }

    /// The latest run of this crawl if it did not complete
    pub fn unfinished_run(&self) -> Option<&RunRecord> {
        self.unfinished_run.as_ref()
    }

    /// Starts a new run and returns its ID
    pub fn start_run(&mut self, config_hash: &str) -> Result<i64, SinkError> {
        let run_id = self.store.create_run(&self.crawl_id, config_hash)?;
        self.run_id = Some(run_id);
        Ok(run_id)
    }

    /// Records the final status of the current run
    pub fn finish_run(&mut self, status: RunStatus) -> Result<(), SinkError> {
        self.flush()?;
        let run_id = self.current_run()?;
        self.store.update_run_status(run_id, status)?;
        Ok(())
    }

    fn current_run(&self) -> Result<i64, SinkError> {
        self.run_id
            .ok_or_else(|| StorageError::Database("no run started".to_string()).into())
    }

    /// Returns true if no record with this source URL was persisted
    pub fn is_new(&self, source_url: &str) -> bool {
        !self.state.is_seen(&dedup_key(source_url))
    }

    /// Reserves a source URL for the calling worker
    ///
    /// Returns false when the URL is already persisted or claimed.
    pub fn claim(&mut self, source_url: &str) -> bool {
        self.state.claim(&dedup_key(source_url))
    }

    /// Gives up a claim after a failed extraction
    pub fn release(&mut self, source_url: &str) {
        self.state.release(&dedup_key(source_url));
    }

    /// Appends a record unless its source URL was already persisted
    ///
    /// The line is written and flushed before the key is recorded, so the
    /// output file is always a superset of the stored seen set.
    pub fn append(&mut self, record: &Record) -> Result<AppendOutcome, SinkError> {
        let key = dedup_key(record.source_url());

        if self.state.is_seen(&key) {
            self.state.release(&key);
            tracing::debug!(url = record.source_url(), "Record already persisted, skipping");
            return Ok(AppendOutcome::AlreadySeen);
        }

        self.writer.append(record)?;
        self.state.mark_seen(&key);
        self.store.insert_seen(&self.crawl_id, &key)?;

        Ok(AppendOutcome::Written)
    }

    /// Returns true if the page was completed by this run or by the
    /// unfinished runs it resumes
    pub fn is_page_done(&self, county_locator: &str, page_number: u32) -> bool {
        self.state.is_page_done(county_locator, page_number)
    }

    /// Persists a page checkpoint
    pub fn complete_page(&mut self, checkpoint: Checkpoint) -> Result<(), SinkError> {
        let run_id = self.current_run()?;
        self.store.save_checkpoint(&self.crawl_id, run_id, &checkpoint)?;
        tracing::debug!(
            county = %checkpoint.county.name,
            page = checkpoint.page_number,
            "Checkpoint written"
        );
        self.state.complete_page(checkpoint);
        Ok(())
    }

    /// Logs a skipped county, page or record in the store
    pub fn record_failure(
        &mut self,
        scope: FailureScope,
        url: &str,
        message: &str,
    ) -> Result<(), SinkError> {
        let run_id = self.current_run()?;
        self.store
            .record_failure(&self.crawl_id, run_id, scope, url, message)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.sync()?;
        Ok(())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}
