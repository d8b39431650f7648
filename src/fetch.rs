//! One market-day query against the source

use rand::Rng;
use std::thread;
use std::time::Duration;
use tracing::trace;

use crate::catalog::MARKET_FIELD;
use crate::error::CrawlError;
use crate::session::{self, SessionState, EVENT_VALIDATION, VIEW_STATE, VIEW_STATE_GENERATOR};
use crate::source::Source;
use crate::types::{DateKey, MarketLabel};

const DATE_FIELD: &str = "ctl00$ContentPlaceHolder1$txtDate";
const CATEGORY_FIELD: &str = "ctl00$ContentPlaceHolder1$DDL_Category";
const CODE_FIELD: &str = "ctl00$ContentPlaceHolder1$DDL_FV_Code";
const SUBMIT_FIELD: &str = "ctl00$ContentPlaceHolder1$btnQuery";

/// Full-market query
const CATEGORY_ALL: &str = "2";
/// Vegetables
const CODE_VEGETABLE: &str = "V";
const SUBMIT_LABEL: &str = "查詢";

/// Randomized pause before each request, in milliseconds (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Politeness {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Politeness {
    /// Draw the next pause; zero when `max_ms` is zero
    fn delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.random_range(self.min_ms..=self.max_ms.max(self.min_ms)))
    }

    fn pause(&self) {
        let delay = self.delay(&mut rand::rng());
        if delay.is_zero() {
            return;
        }
        trace!(ms = delay.as_millis() as u64, "Waiting before next request");
        thread::sleep(delay);
    }
}

pub struct PageFetcher<'a, S> {
    source: &'a S,
    politeness: Politeness,
}

impl<'a, S: Source> PageFetcher<'a, S> {
    pub fn new(source: &'a S, politeness: Politeness) -> Self {
        Self { source, politeness }
    }

    /// Query one market for one date.
    ///
    /// Returns the result markup and the session to use for the next
    /// request. On failure the caller keeps its current session.
    pub fn fetch_market_day(
        &self,
        date: DateKey,
        market: &MarketLabel,
        session: &SessionState,
    ) -> Result<(String, SessionState), CrawlError> {
        self.politeness.pause();

        let form = build_form(date, market, session);
        let exchange = self
            .source
            .submit(&form, &session.cookies)
            .map_err(|source| CrawlError::Fetch {
                date,
                market: market.clone(),
                source,
            })?;

        let next = session::refresh(&exchange, session);
        Ok((exchange.body, next))
    }
}

/// Form fields for "full market, vegetables, this date, this market"
pub fn build_form(date: DateKey, market: &MarketLabel, session: &SessionState) -> Vec<(&'static str, String)> {
    vec![
        ("__EVENTTARGET", String::new()),
        ("__EVENTARGUMENT", String::new()),
        (VIEW_STATE, session.view_state.clone()),
        (VIEW_STATE_GENERATOR, session.view_state_generator.clone()),
        (EVENT_VALIDATION, session.event_validation.clone()),
        (DATE_FIELD, date.to_minguo()),
        (CATEGORY_FIELD, CATEGORY_ALL.to_string()),
        (MARKET_FIELD, market.id.clone()),
        (CODE_FIELD, CODE_VEGETABLE.to_string()),
        (SUBMIT_FIELD, SUBMIT_LABEL.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::source::Exchange;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use reqwest::StatusCode;
    use std::cell::RefCell;

    fn session() -> SessionState {
        SessionState {
            cookies: "ASP.NET_SessionId=abc".to_string(),
            view_state: "vs0".to_string(),
            view_state_generator: "gen0".to_string(),
            event_validation: "ev0".to_string(),
        }
    }

    /// Records what was posted and replies with a fixed outcome
    struct Recorder {
        reply: Result<String, StatusCode>,
        posted: RefCell<Vec<(Vec<(String, String)>, String)>>,
    }

    impl Source for Recorder {
        fn landing(&self) -> Result<Exchange, TransportError> {
            unreachable!()
        }

        fn submit(&self, form: &[(&str, String)], cookies: &str) -> Result<Exchange, TransportError> {
            self.posted.borrow_mut().push((
                form.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
                cookies.to_string(),
            ));
            match &self.reply {
                Ok(body) => Ok(Exchange {
                    body: body.clone(),
                    set_cookies: Vec::new(),
                }),
                Err(status) => Err(TransportError::Status(*status)),
            }
        }
    }

    #[test]
    fn test_build_form_carries_tokens_and_query() {
        let date = DateKey::parse_minguo("113/11/29").unwrap();
        let form = build_form(date, &MarketLabel::new("2", "第二市場"), &session());
        let get = |name: &str| form.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str());
        assert_eq!(get(VIEW_STATE), Some("vs0"));
        assert_eq!(get(VIEW_STATE_GENERATOR), Some("gen0"));
        assert_eq!(get(EVENT_VALIDATION), Some("ev0"));
        assert_eq!(get(DATE_FIELD), Some("113/11/29"));
        assert_eq!(get(CATEGORY_FIELD), Some("2"));
        assert_eq!(get(MARKET_FIELD), Some("2"));
        assert_eq!(get(CODE_FIELD), Some("V"));
        assert_eq!(get(SUBMIT_FIELD), Some("查詢"));
        assert_eq!(get("__EVENTTARGET"), Some(""));
    }

    #[test]
    fn test_fetch_refreshes_session() {
        let source = Recorder {
            reply: Ok(r#"<input name="__VIEWSTATE" value="vs1" /><table></table>"#.to_string()),
            posted: RefCell::new(Vec::new()),
        };
        let fetcher = PageFetcher::new(&source, Politeness { min_ms: 0, max_ms: 0 });
        let date = DateKey::parse_minguo("113/11/29").unwrap();
        let (markup, next) = fetcher
            .fetch_market_day(date, &MarketLabel::new("1", "第一市場"), &session())
            .unwrap();

        assert!(markup.contains("<table>"));
        assert_eq!(next.view_state, "vs1");
        assert_eq!(next.event_validation, "ev0");
        assert_eq!(source.posted.borrow()[0].1, "ASP.NET_SessionId=abc");
    }

    #[test]
    fn test_fetch_failure_names_unit() {
        let source = Recorder {
            reply: Err(StatusCode::INTERNAL_SERVER_ERROR),
            posted: RefCell::new(Vec::new()),
        };
        let fetcher = PageFetcher::new(&source, Politeness { min_ms: 0, max_ms: 0 });
        let date = DateKey::parse_minguo("113/10/01").unwrap();
        let err = fetcher
            .fetch_market_day(date, &MarketLabel::new("1", "第一市場"), &session())
            .unwrap_err();
        match err {
            CrawlError::Fetch { date: d, market, .. } => {
                assert_eq!(d, date);
                assert_eq!(market.id, "1");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_politeness_delay_stays_in_inclusive_range() {
        let politeness = Politeness { min_ms: 500, max_ms: 510 };
        let mut rng = StdRng::seed_from_u64(7);
        let drawn: Vec<u64> = (0..2000)
            .map(|_| politeness.delay(&mut rng).as_millis() as u64)
            .collect();
        assert!(drawn.iter().all(|ms| (500..=510).contains(ms)));
        assert!(drawn.contains(&500));
        assert!(drawn.contains(&510));
    }

    #[test]
    fn test_politeness_fixed_and_disabled() {
        let mut rng = StdRng::seed_from_u64(1);
        let fixed = Politeness { min_ms: 3, max_ms: 3 };
        assert_eq!(fixed.delay(&mut rng), Duration::from_millis(3));
        let off = Politeness { min_ms: 0, max_ms: 0 };
        for _ in 0..100 {
            assert_eq!(off.delay(&mut rng), Duration::ZERO);
        }
    }
}
