//! Crawl driver - main crawl orchestration logic
//!
//! This module contains the loop that walks the region hierarchy and feeds
//! listing pages to a pool of workers, including:
//! - Opening the state store and the dedup sink
//! - Driving the phase state machine
//! - Skipping pages checkpointed by an earlier run
//! - Page timeouts, requeueing and cancellation
//! - Run bookkeeping and the final summary

use crate::config::Config;
use crate::crawler::fetcher::{FetchOptions, Fetcher};
use crate::crawler::scheduler::{PageTask, RateLimiter, Scheduler, StallTimer};
use crate::crawler::walker::{RegionWalker, Walker};
use crate::output::{CrawlSummary, RunCounters};
use crate::site::{build_adapter, PageCount, PartialRecord, Record, Region, SiteAdapter};
use crate::state::{Checkpoint, DriverPhase};
use crate::storage::{open_storage, AppendOutcome, DedupSink, FailureScope, RunStatus};
use crate::{HarvestError, WalkError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

/// Tracks the driver phase and rejects invalid transitions
#[derive(Debug)]
pub struct PhaseTracker {
    current: std::sync::Mutex<DriverPhase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: std::sync::Mutex::new(DriverPhase::Idle),
        }
    }

    pub fn current(&self) -> DriverPhase {
        *self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Moves to `next`, or fails with `InvalidTransition`
    pub fn enter(&self, next: DriverPhase) -> Result<(), HarvestError> {
        let mut current = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !current.can_transition(next) {
            return Err(HarvestError::InvalidTransition {
                from: *current,
                to: next,
            });
        }
        if *current != next {
            tracing::trace!(from = %*current, to = %next, "Phase change");
        }
        *current = next;
        Ok(())
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// How one page attempt of a worker ended
enum PageOutcome {
    Processed(Result<(), HarvestError>),
    Stalled,
    Cancelled,
}

/// How the walk ended when no fatal error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkOutcome {
    Finished,
    Cancelled,
}

/// Main crawl driver structure
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: String,
    adapter: Arc<dyn SiteAdapter>,
    fetcher: Arc<Fetcher>,
    walker: Arc<dyn Walker>,
    sink: Arc<Mutex<DedupSink>>,
    scheduler: Arc<Scheduler>,
    counters: Arc<RunCounters>,
    phase: Arc<PhaseTracker>,
    cancel: watch::Receiver<bool>,
    resuming: bool,
}

impl Coordinator {
    /// Creates a new driver instance
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `config_hash` - Hash of the config file, stored with the run
    /// * `fresh` - Forget earlier progress and move old output aside
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created driver
    /// * `Err(HarvestError)` - Failed to initialize
    pub fn new(config: Config, config_hash: String, fresh: bool) -> Result<Self, HarvestError> {
        let adapter = build_adapter(&config)?;

        let limiter = Arc::new(RateLimiter::from_pacing(&config.pacing));
        let fetcher = Arc::new(Fetcher::new(&config.fetcher)?.with_limiter(limiter));
        let walker: Arc<dyn Walker> = Arc::new(
            RegionWalker::new(Arc::clone(&fetcher), Arc::clone(&adapter))
                .with_filters(&config.crawl),
        );

        std::fs::create_dir_all(&config.output.directory)?;
        let state_path = config.state_path();
        if let Some(parent) = state_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = open_storage(&state_path)?;
        let sink = DedupSink::open(
            &config.crawl_id(),
            &config.output_path(),
            Box::new(store),
            fresh,
        )?;

        let resuming = match sink.unfinished_run() {
            Some(run) => {
                tracing::info!(
                    run_id = run.id,
                    status = run.status.to_db_string(),
                    "Found unfinished run, resuming from checkpoints"
                );
                true
            }
            None => false,
        };

        let (_never_cancelled, cancel) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            config_hash,
            adapter,
            fetcher,
            walker,
            sink: Arc::new(Mutex::new(sink)),
            scheduler: Arc::new(Scheduler::new()),
            counters: Arc::new(RunCounters::new()),
            phase: Arc::new(PhaseTracker::new()),
            cancel,
            resuming,
        })
    }

    /// Replaces the region walker
    pub fn with_walker(mut self, walker: Arc<dyn Walker>) -> Self {
        self.walker = walker;
        self
    }

    /// Stops the crawl once `cancel` turns true
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn crawl_id(&self) -> String {
        self.config.crawl_id()
    }

    pub fn output_path(&self) -> PathBuf {
        self.config.output_path()
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase.current()
    }

    /// True when the store holds an unfinished run of this crawl
    pub fn is_resuming(&self) -> bool {
        self.resuming
    }

    /// Runs the crawl until every county is done, it is cancelled, or a
    /// fatal sink or store error occurs
    ///
    /// The run is recorded as `completed`, `interrupted` or `failed`.
    pub async fn run(&self) -> Result<CrawlSummary, HarvestError> {
        let started = Instant::now();

        if self.resuming {
            self.phase.enter(DriverPhase::Resuming)?;
        }

        let run_id = self.sink.lock().await.start_run(&self.config_hash)?;
        tracing::info!(
            crawl = %self.config.crawl_id(),
            run_id,
            workers = self.config.pacing.workers,
            delay_ms = self.config.pacing.delay,
            "Starting crawl run"
        );

        let outcome = self.walk().await;
        let status = match &outcome {
            Ok(WalkOutcome::Finished) => RunStatus::Completed,
            Ok(WalkOutcome::Cancelled) => RunStatus::Interrupted,
            Err(e) => {
                tracing::error!(error = %e, "Crawl failed");
                RunStatus::Failed
            }
        };

        let finished = self.sink.lock().await.finish_run(status);
        outcome?;
        finished?;

        let summary = CrawlSummary::from_counters(
            &self.config.crawl_id(),
            run_id,
            status,
            self.resuming,
            self.config.output_path(),
            started.elapsed(),
            &self.counters,
        );

        tracing::info!(
            status = status.to_db_string(),
            pages = summary.pages_fetched,
            written = summary.records_written,
            failed = summary.total_failures(),
            elapsed_secs = summary.duration.as_secs(),
            "Crawl run finished"
        );

        Ok(summary)
    }

    async fn walk(&self) -> Result<WalkOutcome, HarvestError> {
        self.phase.enter(DriverPhase::WalkingDistricts)?;
        if self.is_cancelled() {
            return self.pause();
        }

        let districts = match self.walker.list_districts().await {
            Ok(districts) => districts,
            Err(WalkError::NoDistricts { url }) => {
                tracing::warn!(url = %url, "No districts found, nothing to crawl");
                self.phase.enter(DriverPhase::Done)?;
                return Ok(WalkOutcome::Finished);
            }
            Err(e) => return Err(e.into()),
        };

        for (index, district) in districts.iter().enumerate() {
            if self.is_cancelled() {
                return self.pause();
            }
            self.phase.enter(DriverPhase::WalkingCounties)?;
            tracing::info!(
                district = %district.name,
                progress = %format!("{}/{}", index + 1, districts.len()),
                "Walking district"
            );

            let counties = match self.walker.list_counties(district).await {
                Ok(counties) => counties,
                Err(e) => {
                    tracing::warn!(district = %district.name, error = %e, "Skipping district");
                    RunCounters::bump(&self.counters.districts_skipped);
                    self.record_failure(FailureScope::District, &district.locator, &e.to_string())
                        .await?;
                    continue;
                }
            };
            if counties.is_empty() {
                tracing::warn!(district = %district.name, "District lists no counties");
                continue;
            }

            for county in &counties {
                if self.is_cancelled() {
                    return self.pause();
                }
                if !self.crawl_county(district, county).await? {
                    return self.pause();
                }
                self.phase.enter(DriverPhase::WalkingCounties)?;
            }
        }

        self.phase.enter(DriverPhase::Done)?;
        Ok(WalkOutcome::Finished)
    }

    /// Crawls every pending page of one county
    ///
    /// Returns false if the crawl was cancelled while the county was running.
    async fn crawl_county(&self, district: &Region, county: &Region) -> Result<bool, HarvestError> {
        let total = match self.walker.page_count(county).await {
            Ok(PageCount::Known(total)) => total,
            Ok(PageCount::Unknown) => {
                tracing::warn!(county = %county.name, "Page count unknown, skipping county");
                RunCounters::bump(&self.counters.counties_skipped);
                self.record_failure(FailureScope::County, &county.locator, "page count unknown")
                    .await?;
                return Ok(true);
            }
            Err(e) => {
                tracing::warn!(county = %county.name, error = %e, "Skipping county");
                RunCounters::bump(&self.counters.counties_skipped);
                self.record_failure(FailureScope::County, &county.locator, &e.to_string())
                    .await?;
                return Ok(true);
            }
        };

        let first = self.config.crawl.start_page.max(1);
        let last = self
            .config
            .crawl
            .stop_page
            .map_or(total, |stop| stop.min(total));
        if first > last {
            tracing::debug!(county = %county.name, total, "No pages in range");
            return Ok(true);
        }

        let mut tasks = Vec::new();
        let mut already_done = 0u64;
        {
            let sink = self.sink.lock().await;
            for page in first..=last {
                if sink.is_page_done(&county.locator, page) {
                    already_done += 1;
                } else {
                    tasks.push(PageTask::new(district, county, page, total));
                }
            }
        }
        RunCounters::add(&self.counters.pages_resumed, already_done);

        if tasks.is_empty() {
            tracing::info!(county = %county.name, "County already done");
            return Ok(true);
        }

        tracing::info!(
            district = %district.name,
            county = %county.name,
            pages = tasks.len(),
            already_done,
            "Crawling county"
        );

        self.phase.enter(DriverPhase::PagingListing)?;
        self.scheduler.enqueue(tasks).await;
        self.run_workers().await
    }

    /// Runs the worker pool until the queue is drained
    async fn run_workers(&self) -> Result<bool, HarvestError> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut pool = JoinSet::new();

        for id in 0..self.config.pacing.workers.max(1) {
            let worker = Worker {
                id,
                adapter: Arc::clone(&self.adapter),
                fetcher: Arc::clone(&self.fetcher),
                sink: Arc::clone(&self.sink),
                scheduler: Arc::clone(&self.scheduler),
                counters: Arc::clone(&self.counters),
                phase: Arc::clone(&self.phase),
                cancel: self.cancel.clone(),
                stop: Arc::clone(&stop),
                page_timeout: Duration::from_millis(self.config.pacing.page_timeout),
            };
            pool.spawn(worker.run());
        }

        let mut failure: Option<HarvestError> = None;
        while let Some(joined) = pool.join_next().await {
            let result = joined.map_err(HarvestError::from).and_then(|r| r);
            if let Err(e) = result {
                if failure.is_none() {
                    stop.store(true, Ordering::SeqCst);
                    failure = Some(e);
                } else {
                    tracing::debug!(error = %e, "Additional worker failure");
                }
            }
        }

        if let Some(e) = failure {
            self.scheduler.clear().await;
            return Err(e);
        }

        if self.is_cancelled() {
            let dropped = self.scheduler.clear().await;
            tracing::info!(dropped, "Cancelled with pages left in the queue");
            return Ok(false);
        }

        Ok(true)
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn pause(&self) -> Result<WalkOutcome, HarvestError> {
        self.phase.enter(DriverPhase::Paused)?;
        tracing::info!("Crawl paused, progress is checkpointed");
        Ok(WalkOutcome::Cancelled)
    }

    async fn record_failure(
        &self,
        scope: FailureScope,
        url: &str,
        message: &str,
    ) -> Result<(), HarvestError> {
        self.sink.lock().await.record_failure(scope, url, message)?;
        Ok(())
    }
}

/// One member of the page worker pool
struct Worker {
    id: u32,
    adapter: Arc<dyn SiteAdapter>,
    fetcher: Arc<Fetcher>,
    sink: Arc<Mutex<DedupSink>>,
    scheduler: Arc<Scheduler>,
    counters: Arc<RunCounters>,
    phase: Arc<PhaseTracker>,
    cancel: watch::Receiver<bool>,
    stop: Arc<AtomicBool>,
    page_timeout: Duration,
}

impl Worker {
    async fn run(self) -> Result<(), HarvestError> {
        loop {
            if *self.cancel.borrow() || self.stop.load(Ordering::SeqCst) {
                break;
            }
            let Some(task) = self.scheduler.next_task().await else {
                break;
            };
            self.phase.enter(DriverPhase::PagingListing)?;

            let mut claims = Vec::new();
            let stall = Arc::new(StallTimer::start(self.page_timeout));
            let outcome = {
                let mut cancel = self.cancel.clone();
                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => PageOutcome::Cancelled,
                    result = self.process_page(&task, &stall, &mut claims) => {
                        PageOutcome::Processed(result)
                    }
                    _ = stall.expired() => PageOutcome::Stalled,
                }
            };
            self.release_claims(&claims).await;

            match outcome {
                PageOutcome::Cancelled => {
                    tracing::debug!(
                        worker = self.id,
                        page = task.cursor.page_number,
                        "Abandoning page on cancellation"
                    );
                    break;
                }
                PageOutcome::Stalled => self.handle_stall(task).await?,
                PageOutcome::Processed(result) => result?,
            }
        }

        Ok(())
    }

    /// Fetches one listing page, completes its records and checkpoints it
    ///
    /// Fetch and extraction failures skip the page without a checkpoint;
    /// only sink and store errors are returned.
    async fn process_page(
        &self,
        task: &PageTask,
        stall: &Arc<StallTimer>,
        claims: &mut Vec<String>,
    ) -> Result<(), HarvestError> {
        let cursor = &task.cursor;
        let page_url = self.adapter.page_url(&cursor.county, cursor.page_number);
        tracing::debug!(
            worker = self.id,
            url = %page_url,
            page = cursor.page_number,
            total = cursor.total_pages,
            "Fetching listing page"
        );

        let options = FetchOptions::default().with_stall_timer(Arc::clone(stall));
        let markup = match self.fetcher.fetch_with(&page_url, &options).await {
            Ok(markup) => markup,
            Err(e) => return self.page_failed(&page_url, &e.to_string()).await,
        };
        RunCounters::bump(&self.counters.pages_fetched);

        let stubs = match self.adapter.extract_listing(&page_url, &markup) {
            Ok(stubs) => stubs,
            Err(e) => return self.page_failed(&page_url, &e.to_string()).await,
        };
        if stubs.is_empty() {
            tracing::warn!(url = %page_url, "No listings on page");
        }

        for mut stub in stubs {
            stub.tag("district", cursor.district.name.as_str());
            stub.tag("county", cursor.county.name.as_str());
            self.process_stub(stub, &page_url, stall, claims).await?;
        }

        self.sink.lock().await.complete_page(Checkpoint::new(
            cursor.district.clone(),
            cursor.county.clone(),
            cursor.page_number,
        ))?;
        tracing::info!(
            county = %cursor.county.name,
            page = cursor.page_number,
            total = cursor.total_pages,
            "Page done"
        );

        Ok(())
    }

    async fn process_stub(
        &self,
        stub: PartialRecord,
        page_url: &str,
        stall: &Arc<StallTimer>,
        claims: &mut Vec<String>,
    ) -> Result<(), HarvestError> {
        let source_url = stub.source_url.clone();

        if !self.sink.lock().await.claim(&source_url) {
            tracing::trace!(url = %source_url, "Already persisted or in flight");
            RunCounters::bump(&self.counters.records_skipped_seen);
            return Ok(());
        }
        claims.push(source_url.clone());

        let record = match stub.detail_url.clone() {
            None => Ok(stub.into_record()),
            Some(detail_url) => {
                self.phase.enter(DriverPhase::ExtractingDetail)?;
                self.fetch_detail(&detail_url, page_url, stall, stub).await
            }
        };

        match record {
            Ok(record) => {
                RunCounters::bump(&self.counters.records_extracted);
                match self.sink.lock().await.append(&record)? {
                    AppendOutcome::Written => RunCounters::bump(&self.counters.records_written),
                    AppendOutcome::AlreadySeen => {
                        RunCounters::bump(&self.counters.records_skipped_seen)
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %source_url, error = %e, "Skipping record");
                RunCounters::bump(&self.counters.records_failed);
                let mut sink = self.sink.lock().await;
                sink.release(&source_url);
                sink.record_failure(FailureScope::Record, &source_url, &e.to_string())?;
            }
        }

        Ok(())
    }

    async fn fetch_detail(
        &self,
        detail_url: &str,
        page_url: &str,
        stall: &Arc<StallTimer>,
        stub: PartialRecord,
    ) -> Result<Record, HarvestError> {
        let options = FetchOptions::with_referer(page_url).with_stall_timer(Arc::clone(stall));
        let markup = self.fetcher.fetch_with(detail_url, &options).await?;
        Ok(self.adapter.extract_detail(&markup, stub)?)
    }

    async fn page_failed(&self, page_url: &str, message: &str) -> Result<(), HarvestError> {
        tracing::warn!(url = %page_url, error = message, "Skipping page");
        RunCounters::bump(&self.counters.pages_failed);
        self.sink
            .lock()
            .await
            .record_failure(FailureScope::Page, page_url, message)?;
        Ok(())
    }

    async fn handle_stall(&self, task: PageTask) -> Result<(), HarvestError> {
        let page_url = self.adapter.page_url(&task.cursor.county, task.cursor.page_number);

        if self.scheduler.requeue(task).await {
            tracing::warn!(
                url = %page_url,
                busy_limit_ms = self.page_timeout.as_millis() as u64,
                "Page stalled, requeued"
            );
            RunCounters::bump(&self.counters.pages_requeued);
            return Ok(());
        }

        tracing::warn!(url = %page_url, "Page stalled twice, giving up");
        RunCounters::bump(&self.counters.pages_failed);
        self.sink
            .lock()
            .await
            .record_failure(FailureScope::Page, &page_url, "page timed out twice")?;
        Ok(())
    }

    /// Drops claims left by an abandoned or finished page
    async fn release_claims(&self, claims: &[String]) {
        if claims.is_empty() {
            return;
        }
        let mut sink = self.sink.lock().await;
        for url in claims {
            sink.release(url);
        }
    }
}

/// Resolves once the cancellation flag is set
///
/// Never resolves if the sender is gone without cancelling.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_tracker_follows_table() {
        let tracker = PhaseTracker::new();
        assert_eq!(tracker.current(), DriverPhase::Idle);

        tracker.enter(DriverPhase::WalkingDistricts).unwrap();
        tracker.enter(DriverPhase::WalkingCounties).unwrap();
        tracker.enter(DriverPhase::PagingListing).unwrap();
        tracker.enter(DriverPhase::ExtractingDetail).unwrap();
        tracker.enter(DriverPhase::ExtractingDetail).unwrap();
        tracker.enter(DriverPhase::Paused).unwrap();

        assert_eq!(tracker.current(), DriverPhase::Paused);
    }

    #[test]
    fn test_phase_tracker_rejects_invalid() {
        let tracker = PhaseTracker::new();
        let err = tracker.enter(DriverPhase::ExtractingDetail).unwrap_err();

        assert!(matches!(
            err,
            HarvestError::InvalidTransition {
                from: DriverPhase::Idle,
                to: DriverPhase::ExtractingDetail,
            }
        ));
        assert_eq!(tracker.current(), DriverPhase::Idle);
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_flag() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { cancelled(&mut rx).await });

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_pending_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);

        let result = tokio::time::timeout(Duration::from_millis(50), cancelled(&mut rx)).await;
        assert!(result.is_err());
    }
}
