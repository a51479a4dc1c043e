//! Output module for run summaries and exports
//!
//! This module handles:
//! - Counting what a run did and printing the summary
//! - Reading crawl statistics back from the state store
//! - Writing the markdown run report
//! - Converting JSON-lines output to CSV

mod convert;
mod markdown;
pub mod stats;

pub use convert::{convert_jsonl_to_csv, ConversionReport};
pub use markdown::{format_markdown_summary, generate_markdown_summary};
pub use stats::{
    load_statistics, print_statistics, print_summary, CrawlStatistics, CrawlSummary, RunCounters,
};
