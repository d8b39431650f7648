use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Asia::Taipei;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod catalog;
mod config;
mod conl_ser;
mod crawl;
mod error;
mod extract;
mod fetch;
mod planner;
mod session;
mod source;
mod store;
mod types;
mod utils;
mod writer;

use config::{CrawlConfig, DEFAULT_CONFIG_FILE};
use conl_ser::ToConl;
use crawl::Crawler;
use planner::Window;
use source::HttpSource;
use store::MergeStore;
use types::DateKey;
use utils::osc8_file_link;

#[derive(Parser)]
#[command(name = "tapmc-prices")]
#[command(about = "Taipei wholesale market vegetable price crawler")]
struct Cli {
    /// CONL config file (defaults apply when it does not exist)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Dataset CSV path, overriding the config file
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,
    /// Quiet mode - only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch prices and merge them into the dataset
    Crawl {
        #[command(subcommand)]
        mode: CrawlMode,
    },
    /// Summarize the stored dataset
    Status,
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CrawlMode {
    /// Routine refresh of the last few days
    Incremental {
        /// Days to look back from yesterday
        #[arg(long)]
        lookback: Option<u32>,
        /// Newest days to re-fetch even when already stored
        #[arg(long)]
        refresh: Option<u32>,
    },
    /// One-time historical population of a fixed date range
    Backfill {
        /// Newest date to fetch, YYYY-MM-DD (default: yesterday)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Oldest date to fetch, YYYY-MM-DD (default: backfill_floor)
        #[arg(long)]
        to: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a commented config file with the defaults
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Calendar date at the source, which publishes on Taipei time
fn source_date(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Taipei).date_naive()
}

fn to_date_key(date: NaiveDate) -> Result<DateKey> {
    DateKey::from_gregorian(date).with_context(|| format!("{} is before the Minguo calendar", date))
}

fn build_window(config: &CrawlConfig, mode: CrawlMode, today: NaiveDate) -> Result<Window> {
    match mode {
        CrawlMode::Incremental { lookback, refresh } => {
            let lookback = lookback.unwrap_or(config.lookback_days);
            let refresh = refresh.unwrap_or(config.refresh_days);
            if refresh > lookback {
                bail!("--refresh ({}) must not exceed --lookback ({})", refresh, lookback);
            }
            Window::incremental(today, lookback, refresh)
                .with_context(|| format!("No incremental window before {}", today))
        }
        CrawlMode::Backfill { from, to } => {
            let from = from.unwrap_or(today - Duration::days(1));
            let to = to.unwrap_or(config.backfill_floor);
            if from < to {
                bail!("--from ({}) must not be older than --to ({})", from, to);
            }
            Ok(Window::Backfill {
                from: to_date_key(from)?,
                to: to_date_key(to)?,
            })
        }
    }
}

fn run_crawl(config: &CrawlConfig, mode: CrawlMode) -> Result<()> {
    let window = build_window(config, mode, source_date(Utc::now()))?;

    let mut store = MergeStore::read(&config.output)?;
    let source = HttpSource::new(config)?;
    let crawler = Crawler::new(&source, config)?;

    // A failed session leaves the dataset untouched
    let summary = crawler.run(&mut store, &window)?;

    writer::flush(&store, &config.output)?;

    println!(
        "Done. {} units, {} records over {} dates ({} without trades).",
        summary.units,
        summary.records,
        summary.committed_dates.len(),
        summary.empty_dates.len()
    );
    if !summary.failures.is_empty() {
        println!(
            "{} queries failed across {} markets; {} dates will be retried next run:",
            summary.failures.len(),
            summary.markets.len(),
            summary.held_back.len()
        );
        for (date, market) in &summary.failures {
            println!("  {} {}", date, market);
        }
    }
    let path = config.output.to_string_lossy();
    println!(
        "Saved {} records to {}",
        store.record_count(),
        osc8_file_link(&path, &path)
    );
    Ok(())
}

fn run_status(config: &CrawlConfig) -> Result<()> {
    let store = MergeStore::read(&config.output)?;
    let path = config.output.to_string_lossy();

    let (Some(newest), Some(oldest)) = (store.newest(), store.oldest()) else {
        println!("{} holds no data yet", osc8_file_link(&path, &path));
        return Ok(());
    };

    println!("{}", osc8_file_link(&path, &path));
    println!(
        "  {} dates from {} ({}) to {} ({})",
        store.date_count(),
        oldest,
        oldest.gregorian(),
        newest,
        newest.gregorian()
    );
    println!("  {} records", store.record_count());

    let mut per_market: BTreeMap<&str, usize> = BTreeMap::new();
    for record in store.iter() {
        *per_market.entry(record.market.as_str()).or_default() += 1;
    }
    for (market, count) in &per_market {
        println!("    {}: {}", market, count);
    }

    let empty = store.empty_dates();
    if !empty.is_empty() {
        println!("  {} dates without trades", empty.len());
    }
    Ok(())
}

fn run_config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    fs::write(path, CrawlConfig::default().to_conl())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn load_config(path: &Path, output: Option<PathBuf>) -> Result<CrawlConfig> {
    let mut config = CrawlConfig::load(path)?;
    if let Some(output) = output {
        config.output = output;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let Cli {
        config,
        output,
        quiet,
        command,
    } = Cli::parse();
    init_logging(quiet);

    match command {
        Commands::Crawl { mode } => run_crawl(&load_config(&config, output)?, mode),
        Commands::Status => run_status(&load_config(&config, output)?),
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => run_config_init(&config, force),
        },
    }
}
