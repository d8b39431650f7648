//! Engine error taxonomy
//!
//! Only [`CrawlError::SessionInit`] aborts a run. Fetch failures are
//! isolated to their unit; market discovery fallbacks and dropped rows are
//! log events rather than errors.

use reqwest::StatusCode;

use crate::types::{DateKey, MarketLabel};

/// Failure of a single HTTP exchange with the source
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
}

#[derive(thiserror::Error, Debug)]
pub enum CrawlError {
    #[error("failed to open a session with the source: {0}")]
    SessionInit(#[source] TransportError),
    #[error("fetch failed for {market} on {date}: {source}")]
    Fetch {
        date: DateKey,
        market: MarketLabel,
        #[source]
        source: TransportError,
    },
}
