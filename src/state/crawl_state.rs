use crate::site::Region;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Dedup keys of records already persisted
///
/// Grows monotonically; nothing is ever removed.
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    keys: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Adds a key; returns true if it was not present yet
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        self.keys.insert(key.into())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<String> for SeenSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

impl Extend<String> for SeenSet {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        self.keys.extend(iter);
    }
}

/// Marker written after a listing page was fully processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub district: Region,
    pub county: Region,
    pub page_number: u32,
    pub written_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(district: Region, county: Region, page_number: u32) -> Self {
        Self {
            district,
            county,
            page_number,
            written_at: Utc::now(),
        }
    }
}

/// Mutable progress of one crawl
///
/// Owned by the sink and reached through it; the driver never keeps a copy.
/// Keys passed in are already normalized dedup keys.
#[derive(Debug, Default)]
pub struct CrawlState {
    seen: SeenSet,
    in_flight: HashSet<String>,
    completed_pages: HashSet<(String, u32)>,
    checkpoint: Option<Checkpoint>,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores progress loaded from the state store
    pub fn restore(
        seen: SeenSet,
        completed_pages: impl IntoIterator<Item = (String, u32)>,
        checkpoint: Option<Checkpoint>,
    ) -> Self {
        Self {
            seen,
            in_flight: HashSet::new(),
            completed_pages: completed_pages.into_iter().collect(),
            checkpoint,
        }
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn is_seen(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Reserves a key for one worker
    ///
    /// Returns false when the key is already persisted or another worker
    /// holds it.
    pub fn claim(&mut self, key: &str) -> bool {
        if self.seen.contains(key) || self.in_flight.contains(key) {
            return false;
        }
        self.in_flight.insert(key.to_string());
        true
    }

    /// Gives up a claim without persisting
    pub fn release(&mut self, key: &str) {
        self.in_flight.remove(key);
    }

    /// Records a persisted key; returns true if it was new
    pub fn mark_seen(&mut self, key: &str) -> bool {
        self.in_flight.remove(key);
        self.seen.insert(key)
    }

    /// Adds keys found in the output file during reconciliation
    pub fn absorb(&mut self, keys: impl IntoIterator<Item = String>) {
        self.seen.extend(keys);
    }

    pub fn is_page_done(&self, county_locator: &str, page_number: u32) -> bool {
        self.completed_pages
            .contains(&(county_locator.to_string(), page_number))
    }

    pub fn completed_page_count(&self) -> usize {
        self.completed_pages.len()
    }

    /// Marks a page complete and makes its checkpoint the latest one
    pub fn complete_page(&mut self, checkpoint: Checkpoint) {
        self.completed_pages
            .insert((checkpoint.county.locator.clone(), checkpoint.page_number));
        self.checkpoint = Some(checkpoint);
    }

    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }
}
