//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `DriverPhase`: the crawl driver's state machine
//! - `CrawlState`: seen keys, in-flight claims and completed pages
//! - `Checkpoint`: marker written after each processed listing page

mod crawl_state;
mod phase;

pub use crawl_state::{Checkpoint, CrawlState, SeenSet};
pub use phase::DriverPhase;
