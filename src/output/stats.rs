//! Run counters and statistics
//!
//! This module provides the counters the crawl driver updates while it runs,
//! the summary it returns at the end, and the statistics read back from the
//! state store for `--stats`.

use crate::state::Checkpoint;
use crate::storage::{FailureScope, RunRecord, RunStatus, Storage};
use crate::HarvestError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by all workers of a run
#[derive(Debug, Default)]
pub struct RunCounters {
    pub pages_fetched: AtomicU64,
    pub pages_failed: AtomicU64,
    pub pages_requeued: AtomicU64,
    pub pages_resumed: AtomicU64,
    pub districts_skipped: AtomicU64,
    pub counties_skipped: AtomicU64,
    pub records_extracted: AtomicU64,
    pub records_written: AtomicU64,
    pub records_skipped_seen: AtomicU64,
    pub records_failed: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Final report of one run
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub crawl_id: String,
    pub run_id: i64,
    pub status: RunStatus,
    pub resumed: bool,
    pub output_path: PathBuf,
    pub duration: Duration,
    pub pages_fetched: u64,
    pub pages_failed: u64,
    pub pages_requeued: u64,
    /// Pages skipped because an earlier run already checkpointed them
    pub pages_resumed: u64,
    pub districts_skipped: u64,
    pub counties_skipped: u64,
    pub records_extracted: u64,
    pub records_written: u64,
    pub records_skipped_seen: u64,
    pub records_failed: u64,
}

impl CrawlSummary {
    /// Snapshots the counters
    pub fn from_counters(
        crawl_id: &str,
        run_id: i64,
        status: RunStatus,
        resumed: bool,
        output_path: PathBuf,
        duration: Duration,
        counters: &RunCounters,
    ) -> Self {
        Self {
            crawl_id: crawl_id.to_string(),
            run_id,
            status,
            resumed,
            output_path,
            duration,
            pages_fetched: RunCounters::get(&counters.pages_fetched),
            pages_failed: RunCounters::get(&counters.pages_failed),
            pages_requeued: RunCounters::get(&counters.pages_requeued),
            pages_resumed: RunCounters::get(&counters.pages_resumed),
            districts_skipped: RunCounters::get(&counters.districts_skipped),
            counties_skipped: RunCounters::get(&counters.counties_skipped),
            records_extracted: RunCounters::get(&counters.records_extracted),
            records_written: RunCounters::get(&counters.records_written),
            records_skipped_seen: RunCounters::get(&counters.records_skipped_seen),
            records_failed: RunCounters::get(&counters.records_failed),
        }
    }

    /// Items that were skipped because of an error
    pub fn total_failures(&self) -> u64 {
        self.pages_failed + self.districts_skipped + self.counties_skipped + self.records_failed
    }
}

/// Prints the run summary to stdout
pub fn print_summary(summary: &CrawlSummary) {
    println!("=== Crawl Summary ===\n");

    println!("Run:");
    println!("  Crawl: {}", summary.crawl_id);
    println!("  Run ID: {}", summary.run_id);
    println!("  Status: {}", summary.status.to_db_string());
    if summary.resumed {
        println!("  Resumed an unfinished run");
    }
    println!("  Duration: {:.1}s", summary.duration.as_secs_f64());
    println!("  Output: {}", summary.output_path.display());
    println!();

    println!("Pages:");
    println!("  Fetched: {}", summary.pages_fetched);
    println!("  Failed: {}", summary.pages_failed);
    println!("  Requeued after stall: {}", summary.pages_requeued);
    println!("  Already done: {}", summary.pages_resumed);
    println!("  Districts skipped: {}", summary.districts_skipped);
    println!("  Counties skipped: {}", summary.counties_skipped);
    println!();

    println!("Records:");
    println!("  Extracted: {}", summary.records_extracted);
    println!("  Written: {}", summary.records_written);
    println!("  Already seen: {}", summary.records_skipped_seen);
    println!("  Failed: {}", summary.records_failed);
}

/// Progress of a crawl as recorded in the state store
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    pub crawl_id: String,
    pub runs: Vec<RunRecord>,
    pub seen_records: u64,
    pub completed_pages: u64,
    pub latest_checkpoint: Option<Checkpoint>,

    /// Failures of the latest run by scope
    pub failures_by_scope: HashMap<FailureScope, u64>,
}

/// Loads statistics for one crawl identity
///
/// # Arguments
///
/// * `storage` - The state store to query
/// * `crawl_id` - Crawl identity (`site:city:category`)
pub fn load_statistics(
    storage: &dyn Storage,
    crawl_id: &str,
) -> Result<CrawlStatistics, HarvestError> {
    let runs = storage.list_runs(crawl_id)?;
    let seen_records = storage.count_seen(crawl_id)?;
    let completed_pages = storage.load_completed_pages(crawl_id)?.len() as u64;
    let latest_checkpoint = storage.latest_checkpoint(crawl_id)?;

    let failures_by_scope = match runs.last() {
        Some(run) => storage.count_failures_by_scope(run.id)?,
        None => HashMap::new(),
    };

    Ok(CrawlStatistics {
        crawl_id: crawl_id.to_string(),
        runs,
        seen_records,
        completed_pages,
        latest_checkpoint,
        failures_by_scope,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics: {} ===\n", stats.crawl_id);

    println!("Overview:");
    println!("  Records persisted: {}", stats.seen_records);
    println!("  Pages completed: {}", stats.completed_pages);
    match &stats.latest_checkpoint {
        Some(cp) => println!(
            "  Last checkpoint: {} / {} page {} at {}",
            cp.district.name,
            cp.county.name,
            cp.page_number,
            cp.written_at.to_rfc3339()
        ),
        None => println!("  Last checkpoint: none"),
    }
    println!();

    println!("Runs ({}):", stats.runs.len());
    for run in &stats.runs {
        println!(
            "  #{} {} started {} finished {}",
            run.id,
            run.status.to_db_string(),
            run.started_at,
            run.finished_at.as_deref().unwrap_or("-")
        );
    }
    println!();

    if !stats.failures_by_scope.is_empty() {
        println!("Failures in latest run:");
        let mut counts: Vec<_> = stats.failures_by_scope.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));
        for (scope, count) in counts {
            println!("  {}: {}", scope.to_db_string(), count);
        }
    }
}
