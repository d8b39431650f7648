//! Core record types for the wholesale price dataset

use chrono::{Datelike, Days, NaiveDate};
use std::fmt;

/// Offset between Gregorian years and Minguo (ROC era) years
pub const MINGUO_OFFSET: i32 = 1911;

/// Calendar date keyed the way the source names it (`era/MM/DD`)
///
/// Ordering follows the underlying Gregorian date, so keys sort
/// chronologically even across era-year digit boundaries (99 → 100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateKey(NaiveDate);

impl DateKey {
    /// Minguo 1/01/01
    pub const FIRST: DateKey = match NaiveDate::from_ymd_opt(MINGUO_OFFSET + 1, 1, 1) {
        Some(date) => DateKey(date),
        None => panic!("1912-01-01 is a valid date"),
    };

    /// Wrap a Gregorian date. Dates before the first Minguo year have no
    /// valid representation and are rejected.
    pub fn from_gregorian(date: NaiveDate) -> Option<Self> {
        if date.year() <= MINGUO_OFFSET {
            return None;
        }
        Some(Self(date))
    }

    /// Parse `era/month/day` (e.g. "113/11/29", also accepts "113/1/5")
    pub fn parse_minguo(s: &str) -> Option<Self> {
        let mut parts = s.trim().split('/');
        let era: i32 = parts.next()?.trim().parse().ok()?;
        let month: u32 = parts.next()?.trim().parse().ok()?;
        let day: u32 = parts.next()?.trim().parse().ok()?;
        if parts.next().is_some() || era < 1 {
            return None;
        }
        NaiveDate::from_ymd_opt(era + MINGUO_OFFSET, month, day).map(Self)
    }

    pub fn gregorian(self) -> NaiveDate {
        self.0
    }

    pub fn era_year(self) -> i32 {
        self.0.year() - MINGUO_OFFSET
    }

    /// Canonical text form, month and day zero-padded
    pub fn to_minguo(self) -> String {
        format!("{}/{:02}/{:02}", self.era_year(), self.0.month(), self.0.day())
    }

    /// `days` calendar days earlier, clamped to [`DateKey::FIRST`]
    pub fn saturating_sub_days(self, days: u32) -> Self {
        self.0
            .checked_sub_days(Days::new(u64::from(days)))
            .and_then(Self::from_gregorian)
            .unwrap_or(Self::FIRST)
    }

    /// The previous calendar day, if it is still inside the Minguo calendar
    pub fn pred(self) -> Option<Self> {
        self.0.pred_opt().and_then(Self::from_gregorian)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_minguo())
    }
}

/// A queryable market: the source's option value plus its display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketLabel {
    pub id: String,
    pub name: String,
}

impl MarketLabel {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MarketLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// One price observation for a product on a market day.
///
/// `market` holds the market's display name, which is what the dataset
/// persists. Numeric fields are already coerced; unparseable source text
/// becomes `0.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub date: DateKey,
    pub market: String,
    pub code: String,
    pub name: String,
    pub variety: String,
    pub high: f64,
    pub mid: f64,
    pub low: f64,
    pub avg: f64,
    pub volume: f64,
}

impl Record {
    /// Identity within a date bucket
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.market, &self.code, &self.variety)
    }
}
