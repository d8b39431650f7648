//! Market discovery from the landing page's market selector

use scraper::{Html, Selector};
use tracing::warn;

use crate::types::MarketLabel;
use crate::utils::clean_text;

pub const MARKET_FIELD: &str = "ctl00$ContentPlaceHolder1$DDL_Market";

/// Option value of the "please choose" entry
const NO_SELECTION: &str = "0";

/// List the markets offered by the selector, in page order.
///
/// Falls back to `fallback` when the selector is missing or empty; the run
/// carries on with that reduced list.
pub fn discover(markup: &str, fallback: &[MarketLabel]) -> Vec<MarketLabel> {
    let document = Html::parse_document(markup);

    let markets: Vec<MarketLabel> = Selector::parse(&format!(r#"select[name="{}"] option"#, MARKET_FIELD))
        .map(|options| {
            document
                .select(&options)
                .filter_map(|option| {
                    let id = option.value().attr("value")?.trim();
                    if id.is_empty() || id == NO_SELECTION {
                        return None;
                    }
                    Some(MarketLabel::new(id, clean_text(option.text())))
                })
                .collect()
        })
        .unwrap_or_default();

    if markets.is_empty() {
        warn!(
            fallback = ?fallback.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            "Could not auto-detect markets, using defaults"
        );
        return fallback.to_vec();
    }

    markets
}
