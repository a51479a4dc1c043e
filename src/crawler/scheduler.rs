//! Scheduler for page tasks and request pacing
//!
//! This module handles:
//! - The queue of listing pages the workers of one county pull from
//! - A one-time requeue of pages that stalled past the page timeout
//! - A token-bucket rate limiter shared by every request of the run
//! - The busy-time budget after which a page counts as stalled

use crate::config::PacingConfig;
use crate::site::{PageCursor, Region};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// A listing page waiting to be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    pub cursor: PageCursor,

    /// Times this page was abandoned for running past the page timeout
    pub stalls: u32,
}

impl PageTask {
    pub fn new(district: &Region, county: &Region, page_number: u32, total_pages: u32) -> Self {
        Self {
            cursor: PageCursor {
                district: district.clone(),
                county: county.clone(),
                page_number,
                total_pages,
            },
            stalls: 0,
        }
    }
}

/// Queue of page tasks shared by the workers of one county
///
/// Pages are handed out in ascending order. A task is requeued at most once.
pub struct Scheduler {
    queue: Mutex<VecDeque<PageTask>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Queues the pages of one county
    pub async fn enqueue(&self, tasks: impl IntoIterator<Item = PageTask>) {
        self.queue.lock().await.extend(tasks);
    }

    /// Takes the next page, or `None` when the county is drained
    pub async fn next_task(&self) -> Option<PageTask> {
        self.queue.lock().await.pop_front()
    }

    /// Puts a stalled page back at the end of the queue
    ///
    /// Returns false if the page already stalled once; the caller then counts
    /// it as failed.
    pub async fn requeue(&self, mut task: PageTask) -> bool {
        if task.stalls > 0 {
            return false;
        }
        task.stalls += 1;
        self.queue.lock().await.push_back(task);
        true
    }

    /// Drops every queued page
    pub async fn clear(&self) -> usize {
        let mut queue = self.queue.lock().await;
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Token-bucket limiter pacing requests across all workers
///
/// The bucket holds up to `burst` tokens and gains one token per `delay`.
/// Each request takes a token; when none is left the caller reserves the next
/// one and sleeps until it is due, so waiting callers are served in order and
/// requests stay at least `delay` apart once the burst is spent.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a limiter with a full bucket
    pub fn new(delay: Duration, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        let delay_secs = delay.as_secs_f64().max(0.001);

        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: 1.0 / delay_secs,
        }
    }

    pub fn from_pacing(pacing: &PacingConfig) -> Self {
        Self::new(Duration::from_millis(pacing.delay), pacing.burst)
    }

    /// Waits until the caller may issue one request
    pub async fn acquire(&self) {
        let wait = {
            let mut bucket = self.bucket.lock().await;
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            bucket.last_refill = now;

            bucket.tokens -= 1.0;
            if bucket.tokens >= 0.0 {
                None
            } else {
                Some(Duration::from_secs_f64(-bucket.tokens / self.refill_per_sec))
            }
        };

        if let Some(wait) = wait {
            tracing::trace!(wait_ms = wait.as_millis() as u64, "Pacing request");
            tokio::time::sleep(wait).await;
        }
    }
}

/// Busy-time budget of one page
///
/// Time spent waiting for a rate-limiter token or sleeping between retries is
/// paused and does not count, so pacing alone never makes a page stall.
#[derive(Debug)]
pub struct StallTimer {
    limit: Duration,
    clock: std::sync::Mutex<StallClock>,
    resumed: Notify,
}

#[derive(Debug)]
struct StallClock {
    banked: Duration,
    running_since: Option<Instant>,
    pauses: u32,
}

impl StallClock {
    fn busy(&self) -> Duration {
        self.banked + self.running_since.map_or(Duration::ZERO, |since| since.elapsed())
    }
}

impl StallTimer {
    /// Starts a running timer
    pub fn start(limit: Duration) -> Self {
        Self {
            limit,
            clock: std::sync::Mutex::new(StallClock {
                banked: Duration::ZERO,
                running_since: Some(Instant::now()),
                pauses: 0,
            }),
            resumed: Notify::new(),
        }
    }

    /// Busy time so far
    pub fn busy(&self) -> Duration {
        self.lock().busy()
    }

    /// Stops the clock until the returned guard is dropped
    pub fn pause(&self) -> StallPause<'_> {
        let mut clock = self.lock();
        if let Some(since) = clock.running_since.take() {
            clock.banked += since.elapsed();
        }
        clock.pauses += 1;
        StallPause { timer: self }
    }

    fn resume(&self) {
        {
            let mut clock = self.lock();
            clock.pauses = clock.pauses.saturating_sub(1);
            if clock.pauses == 0 && clock.running_since.is_none() {
                clock.running_since = Some(Instant::now());
            }
        }
        self.resumed.notify_waiters();
    }

    /// Resolves once the busy time reaches the limit
    pub async fn expired(&self) {
        loop {
            let resumed = self.resumed.notified();
            let (busy, paused) = {
                let clock = self.lock();
                (clock.busy(), clock.pauses > 0)
            };

            if paused {
                resumed.await;
            } else if busy >= self.limit {
                return;
            } else {
                tokio::time::sleep(self.limit - busy).await;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StallClock> {
        self.clock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps a `StallTimer` paused while alive
#[derive(Debug)]
pub struct StallPause<'a> {
    timer: &'a StallTimer,
}

impl Drop for StallPause<'_> {
    fn drop(&mut self) {
        self.timer.resume();
    }
}
