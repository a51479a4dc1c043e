//! Listing-Harvester main entry point
//!
//! This is the command-line interface for the Listing-Harvester crawler.

use anyhow::Context;
use clap::Parser;
use listing_harvester::config::{load_config_with_hash, validate, Config, Overrides};
use listing_harvester::crawler::run_crawl;
use listing_harvester::output::{
    convert_jsonl_to_csv, generate_markdown_summary, load_statistics, print_statistics,
    print_summary,
};
use listing_harvester::site::build_adapter;
use listing_harvester::storage::open_storage;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Listing-Harvester: a polite, resumable listing crawler
///
/// Walks a listing site district by district and county by county, extracts
/// one record per listing and appends it exactly once to a JSON-lines file.
/// Interrupted crawls resume from the last completed page.
#[derive(Parser, Debug)]
#[command(name = "listing-harvester")]
#[command(version)]
#[command(about = "A polite, resumable listing crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// City to crawl (overrides the config file)
    #[arg(long)]
    city: Option<String>,

    /// Listing category (overrides the config file)
    #[arg(long)]
    category: Option<String>,

    /// First listing page of every county
    #[arg(long)]
    start_page: Option<u32>,

    /// Last listing page of every county
    #[arg(long)]
    stop_page: Option<u32>,

    /// First month (YYYYMM) for date-ranged sites
    #[arg(long)]
    start_month: Option<String>,

    /// Last month (YYYYMM) for date-ranged sites
    #[arg(long)]
    stop_month: Option<String>,

    /// Directory receiving the output file
    #[arg(long)]
    output_dir: Option<String>,

    /// Number of concurrent page workers
    #[arg(long)]
    workers: Option<u32>,

    /// Minimum delay between requests in milliseconds
    #[arg(long)]
    delay: Option<u64>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume an interrupted crawl (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh crawl; earlier output is moved to `<file>.bak`
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "export_csv"])]
    dry_run: bool,

    /// Show progress recorded in the state store and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export_csv"])]
    stats: bool,

    /// Convert the crawl's JSON-lines output to CSV and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    export_csv: bool,

    /// Column used to drop repeated rows when exporting CSV
    #[arg(long, requires = "export_csv")]
    dedup_key: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            city: self.city.clone(),
            category: self.category.clone(),
            start_page: self.start_page,
            stop_page: self.stop_page,
            start_month: self.start_month.clone(),
            stop_month: self.stop_month.clone(),
            output_dir: self.output_dir.clone(),
            workers: self.workers,
            delay: self.delay,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.apply_overrides(cli.overrides());
    validate(&config).context("Invalid configuration after command-line overrides")?;
    tracing::info!(hash = %config_hash, crawl = %config.crawl_id(), "Configuration loaded");

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else if cli.export_csv {
        handle_export_csv(&config, cli.dedup_key.as_deref())
    } else {
        handle_crawl(config, config_hash, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG` takes precedence when set.
fn setup_logging(verbose: u8, quiet: bool) {
    let default = if quiet {
        "error"
    } else {
        match verbose {
            0 => "listing_harvester=info,warn",
            1 => "listing_harvester=debug,info",
            2 => "listing_harvester=trace,debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let adapter = build_adapter(config)?;

    println!("=== Listing-Harvester Dry Run ===\n");

    println!("Crawl:");
    println!("  Identity: {}", config.crawl_id());
    println!("  Site: {}", adapter.name());
    println!("  Entry URL: {}", adapter.entry_url());
    match config.crawl.stop_page {
        Some(stop) => println!("  Pages: {}..={}", config.crawl.start_page, stop),
        None => println!("  Pages: {}..=last", config.crawl.start_page),
    }
    if let Some(start) = &config.crawl.start_month {
        println!(
            "  Months: {}..={}",
            start,
            config.crawl.stop_month.as_deref().unwrap_or("current")
        );
    }
    if !config.crawl.districts.is_empty() {
        println!("  Districts: {}", config.crawl.districts.join(", "));
    }
    if !config.crawl.counties.is_empty() {
        println!("  Counties: {}", config.crawl.counties.join(", "));
    }

    println!("\nPacing:");
    println!("  Delay: {}ms (burst {})", config.pacing.delay, config.pacing.burst);
    println!("  Workers: {}", config.pacing.workers);
    println!(
        "  Retries: {} attempts, {:?} backoff from {}ms",
        config.fetcher.max_retries, config.fetcher.backoff, config.fetcher.retry_delay
    );

    println!("\nOutput:");
    println!("  Records: {}", config.output_path().display());
    println!("  State store: {}", config.state_path().display());
    if let Some(summary) = &config.output.summary_path {
        println!("  Summary: {}", summary);
    }

    if config.state_path().exists() {
        let storage = open_storage(&config.state_path())?;
        let stats = load_statistics(&storage, &config.crawl_id())?;
        println!(
            "\nExisting progress: {} records, {} pages done, {} runs",
            stats.seen_records,
            stats.completed_pages,
            stats.runs.len()
        );
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows progress from the state store
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let state_path = config.state_path();
    if !state_path.exists() {
        anyhow::bail!("No state store at {}", state_path.display());
    }

    println!("State store: {}\n", state_path.display());
    let storage = open_storage(&state_path)?;
    let stats = load_statistics(&storage, &config.crawl_id())?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --export-csv mode: converts the output file next to itself
fn handle_export_csv(config: &Config, dedup_key: Option<&str>) -> anyhow::Result<()> {
    let input = config.output_path();
    if !input.exists() {
        anyhow::bail!("No output file at {}", input.display());
    }
    let output = input.with_extension("csv");

    let report = convert_jsonl_to_csv(std::slice::from_ref(&input), &output, dedup_key)
        .with_context(|| format!("Failed to convert {}", input.display()))?;

    println!(
        "✓ Wrote {} rows ({} columns) to {}",
        report.rows_written,
        report.columns.len(),
        output.display()
    );
    if report.exact_duplicates + report.key_duplicates + report.malformed_lines > 0 {
        println!(
            "  Dropped {} exact duplicates, {} repeated keys, {} malformed lines",
            report.exact_duplicates, report.key_duplicates, report.malformed_lines
        );
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: String, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh crawl (ignoring previous state)");
    } else {
        tracing::info!("Starting crawl (will resume if an unfinished run exists)");
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight work and pausing");
            let _ = cancel_tx.send(true);
        }
    });

    let summary_path = config.output.summary_path.clone();
    let summary = run_crawl(config, config_hash, fresh, cancel_rx)
        .await
        .context("Crawl failed")?;

    print_summary(&summary);

    if let Some(path) = summary_path {
        generate_markdown_summary(&summary, Path::new(&path))
            .with_context(|| format!("Failed to write summary to {}", path))?;
        tracing::info!(path = %path, "Summary written");
    }

    Ok(())
}
