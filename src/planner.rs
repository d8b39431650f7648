//! Query planning over the date × market space

use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fmt;

use crate::store::MergeStore;
use crate::types::{DateKey, MarketLabel};

/// Which dates a run should consider, newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Window {
    /// Fixed historical range, `from` (newest) down to `to` (oldest)
    Backfill { from: DateKey, to: DateKey },
    /// Trailing window ending at `latest`. The newest `refresh_days` dates
    /// are re-fetched on every run even if already stored, since the source
    /// may still be publishing them.
    Incremental {
        latest: DateKey,
        lookback_days: u32,
        refresh_days: u32,
    },
}

impl Window {
    /// Incremental window anchored on the day before `today`
    pub fn incremental(today: NaiveDate, lookback_days: u32, refresh_days: u32) -> Option<Self> {
        let latest = DateKey::from_gregorian(today.pred_opt()?)?;
        Some(Window::Incremental {
            latest,
            lookback_days,
            refresh_days: refresh_days.min(lookback_days),
        })
    }

    /// Newest and oldest dates of the window, or None when it is empty
    fn bounds(&self) -> Option<(DateKey, DateKey)> {
        match *self {
            Window::Backfill { from, to } => (from >= to).then_some((from, to)),
            Window::Incremental {
                latest,
                lookback_days,
                ..
            } => {
                let span = lookback_days.checked_sub(1)?;
                Some((latest, latest.saturating_sub_days(span)))
            }
        }
    }

    /// Dates on or after this one are planned regardless of completeness
    fn refresh_from(&self) -> Option<DateKey> {
        match *self {
            Window::Backfill { .. } => None,
            Window::Incremental {
                latest,
                refresh_days,
                ..
            } => {
                let span = refresh_days.checked_sub(1)?;
                Some(latest.saturating_sub_days(span))
            }
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::Backfill { from, to } => write!(f, "backfill {} → {}", from, to),
            Window::Incremental {
                latest,
                lookback_days,
                refresh_days,
            } => write!(
                f,
                "incremental {} days back from {} (refreshing newest {})",
                lookback_days, latest, refresh_days
            ),
        }
    }
}

/// Lazy, finite sequence of `(date, market)` units to fetch.
///
/// Dates run newest to oldest; within a date, markets keep catalog order.
/// A date already complete in the store is skipped as a whole, unless it
/// falls inside the window's refresh span.
#[derive(Debug, Clone)]
pub struct Plan {
    current: Option<DateKey>,
    oldest: Option<DateKey>,
    refresh_from: Option<DateKey>,
    complete: BTreeSet<DateKey>,
    markets: Vec<MarketLabel>,
    market_idx: usize,
}

pub fn plan(store: &MergeStore, window: &Window, markets: &[MarketLabel]) -> Plan {
    let bounds = window.bounds();
    let complete = bounds
        .map(|(newest, oldest)| store.complete_dates_in(oldest..=newest))
        .unwrap_or_default();

    Plan {
        current: bounds.map(|(newest, _)| newest),
        oldest: bounds.map(|(_, oldest)| oldest),
        refresh_from: window.refresh_from(),
        complete,
        markets: markets.to_vec(),
        market_idx: 0,
    }
}

impl Plan {
    fn is_due(&self, date: DateKey) -> bool {
        !self.complete.contains(&date) || self.refresh_from.is_some_and(|r| date >= r)
    }

    fn advance_date(&mut self) {
        self.market_idx = 0;
        self.current = self
            .current
            .and_then(DateKey::pred)
            .filter(|d| self.oldest.is_some_and(|oldest| *d >= oldest));
    }
}

impl Iterator for Plan {
    type Item = (DateKey, MarketLabel);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let date = self.current?;
            if self.is_due(date) {
                if let Some(market) = self.markets.get(self.market_idx) {
                    self.market_idx += 1;
                    return Some((date, market.clone()));
                }
            }
            self.advance_date();
        }
    }
}
