//! The sequential crawl-and-merge loop
//!
//! One session, one request at a time: each response's tokens feed the
//! next request, so units are never fetched concurrently.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::catalog;
use crate::config::CrawlConfig;
use crate::error::CrawlError;
use crate::extract::RecordExtractor;
use crate::fetch::{PageFetcher, Politeness};
use crate::planner::{self, Window};
use crate::session;
use crate::source::Source;
use crate::store::MergeStore;
use crate::types::{DateKey, MarketLabel, Record};

/// What a run did, for the operator
#[derive(Debug, Default)]
pub struct RunSummary {
    pub markets: Vec<MarketLabel>,
    /// Units attempted
    pub units: usize,
    /// Records absorbed into the store
    pub records: usize,
    pub committed_dates: Vec<DateKey>,
    /// Committed dates on which no market traded
    pub empty_dates: Vec<DateKey>,
    /// Dates left incomplete because a market failed
    pub held_back: Vec<DateKey>,
    pub failures: Vec<(DateKey, MarketLabel)>,
}

/// Results gathered for one date while its markets are being fetched
struct DateBatch {
    date: DateKey,
    records: Vec<Record>,
    failed: usize,
}

impl DateBatch {
    fn new(date: DateKey) -> Self {
        Self {
            date,
            records: Vec::new(),
            failed: 0,
        }
    }
}

pub struct Crawler<'a, S> {
    source: &'a S,
    extractor: RecordExtractor,
    fallback_markets: Vec<MarketLabel>,
    politeness: Politeness,
}

impl<'a, S: Source> Crawler<'a, S> {
    pub fn new(source: &'a S, config: &CrawlConfig) -> Result<Self> {
        Ok(Self {
            source,
            extractor: RecordExtractor::new(&config.code_prefix)?,
            fallback_markets: config.fallback_markets(),
            politeness: config.politeness(),
        })
    }

    /// Fetch every planned unit in `window` and merge the results into `store`.
    ///
    /// Only a failure to open the session is returned as an error; per-unit
    /// fetch failures are logged and leave their date for the next run.
    pub fn run(&self, store: &mut MergeStore, window: &Window) -> Result<RunSummary, CrawlError> {
        info!(%window, "Fetching initial page");
        let (mut session, landing) = session::initialize(self.source)?;

        let markets = catalog::discover(&landing, &self.fallback_markets);
        info!(
            markets = ?markets.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            "Target markets"
        );

        let fetcher = PageFetcher::new(self.source, self.politeness);
        let mut summary = RunSummary {
            markets: markets.clone(),
            ..Default::default()
        };
        let mut pending: Option<DateBatch> = None;

        for (date, market) in planner::plan(store, window, &markets) {
            if pending.as_ref().is_some_and(|batch| batch.date != date) {
                if let Some(batch) = pending.take() {
                    commit(store, batch, &mut summary);
                }
            }
            let batch = pending.get_or_insert_with(|| {
                info!(date = %date, "Processing");
                DateBatch::new(date)
            });

            summary.units += 1;
            match fetcher.fetch_market_day(date, &market, &session) {
                Ok((markup, next)) => {
                    session = next;
                    let records = self.extractor.extract(&markup, date, &market);
                    info!(date = %date, market = %market.name, records = records.len(), "Fetched");
                    batch.records.extend(records);
                }
                Err(err) => {
                    warn!(date = %date, market = %market.name, error = %err, "Query failed");
                    batch.failed += 1;
                    summary.failures.push((date, market));
                }
            }
        }
        if let Some(batch) = pending.take() {
            commit(store, batch, &mut summary);
        }

        Ok(summary)
    }
}

/// Absorb a date only when every market answered; otherwise keep what the
/// store already has and leave the date to be retried.
fn commit(store: &mut MergeStore, batch: DateBatch, summary: &mut RunSummary) {
    if batch.failed > 0 {
        warn!(
            date = %batch.date,
            failed = batch.failed,
            discarded = batch.records.len(),
            "Holding back date, will retry next run"
        );
        summary.held_back.push(batch.date);
        return;
    }

    if batch.records.is_empty() {
        info!(date = %batch.date, "No trades reported");
        summary.empty_dates.push(batch.date);
    }
    let refreshed = store.is_complete(batch.date);
    summary.records += batch.records.len();
    summary.committed_dates.push(batch.date);
    store.absorb(batch.date, batch.records);
    debug!(
        date = %batch.date,
        refreshed,
        stored = store.records(batch.date).len(),
        "Committed"
    );
}
