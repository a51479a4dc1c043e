//! Markdown summary generation

use crate::output::stats::CrawlSummary;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Writes the run summary as markdown to `output_path`
///
/// # Arguments
///
/// * `summary` - The crawl summary data
/// * `output_path` - Path where the markdown file should be written
pub fn generate_markdown_summary(summary: &CrawlSummary, output_path: &Path) -> io::Result<()> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let markdown = format_markdown_summary(summary);
    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a crawl summary as markdown
pub fn format_markdown_summary(summary: &CrawlSummary) -> String {
    let mut md = String::new();

    md.push_str("# Listing-Harvester Crawl Summary\n\n");

    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Crawl**: {}\n", summary.crawl_id));
    md.push_str(&format!("- **Run ID**: {}\n", summary.run_id));
    md.push_str(&format!("- **Status**: {}\n", summary.status.to_db_string()));
    md.push_str(&format!(
        "- **Resumed**: {}\n",
        if summary.resumed { "yes" } else { "no" }
    ));
    md.push_str(&format!(
        "- **Duration**: {:.1} seconds\n",
        summary.duration.as_secs_f64()
    ));
    md.push_str(&format!(
        "- **Output**: `{}`\n\n",
        summary.output_path.display()
    ));

    md.push_str("## Pages\n\n");
    md.push_str("| Outcome | Count |\n");
    md.push_str("|---------|-------|\n");
    md.push_str(&format!("| Fetched | {} |\n", summary.pages_fetched));
    md.push_str(&format!("| Failed | {} |\n", summary.pages_failed));
    md.push_str(&format!(
        "| Requeued after stall | {} |\n",
        summary.pages_requeued
    ));
    md.push_str(&format!(
        "| Done in an earlier run | {} |\n",
        summary.pages_resumed
    ));
    md.push_str(&format!(
        "| Districts skipped | {} |\n",
        summary.districts_skipped
    ));
    md.push_str(&format!(
        "| Counties skipped | {} |\n\n",
        summary.counties_skipped
    ));

    md.push_str("## Records\n\n");
    md.push_str("| Outcome | Count |\n");
    md.push_str("|---------|-------|\n");
    md.push_str(&format!("| Extracted | {} |\n", summary.records_extracted));
    md.push_str(&format!("| Written | {} |\n", summary.records_written));
    md.push_str(&format!(
        "| Already seen | {} |\n",
        summary.records_skipped_seen
    ));
    md.push_str(&format!("| Failed | {} |\n", summary.records_failed));

    if summary.total_failures() > 0 {
        md.push_str(&format!(
            "\n{} item(s) were skipped because of errors; see the `failures` table of the state store.\n",
            summary.total_failures()
        ));
    }

    md
}
