//! Session continuity for the form protocol
//!
//! Every POST must carry the hidden tokens and cookies handed out by the
//! most recent response. A [`SessionState`] is a value: each exchange
//! produces a new one via [`refresh`], and the caller replaces the one it
//! holds.

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::error::CrawlError;
use crate::source::{Exchange, Source};

pub const VIEW_STATE: &str = "__VIEWSTATE";
pub const VIEW_STATE_GENERATOR: &str = "__VIEWSTATEGENERATOR";
pub const EVENT_VALIDATION: &str = "__EVENTVALIDATION";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// `Cookie` header value (`name=value; name=value`)
    pub cookies: String,
    pub view_state: String,
    pub view_state_generator: String,
    pub event_validation: String,
}

impl SessionState {
    /// Names of the hidden tokens we have never received
    pub fn missing_tokens(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.view_state.is_empty() {
            missing.push(VIEW_STATE);
        }
        if self.view_state_generator.is_empty() {
            missing.push(VIEW_STATE_GENERATOR);
        }
        if self.event_validation.is_empty() {
            missing.push(EVENT_VALIDATION);
        }
        missing
    }
}

/// Open a session: fetch the landing page and pick up its tokens.
///
/// Returns the initial state together with the landing markup, which the
/// market catalog is discovered from. A transport failure here is fatal.
pub fn initialize<S: Source>(source: &S) -> Result<(SessionState, String), CrawlError> {
    let exchange = source.landing().map_err(CrawlError::SessionInit)?;
    let state = refresh(&exchange, &SessionState::default());

    let missing = state.missing_tokens();
    if missing.is_empty() {
        debug!(cookies = !state.cookies.is_empty(), "Session initialized");
    } else {
        warn!(?missing, "Landing page did not carry every session token");
    }

    Ok((state, exchange.body))
}

/// Derive the next session from a response.
///
/// Each field is taken from the response when present there and carried
/// over from `previous` otherwise; nothing is ever cleared.
pub fn refresh(exchange: &Exchange, previous: &SessionState) -> SessionState {
    let document = Html::parse_document(&exchange.body);
    let token = |name: &str, prev: &String| hidden_field(&document, name).unwrap_or_else(|| prev.clone());

    SessionState {
        cookies: merge_cookies(&previous.cookies, &exchange.set_cookies),
        view_state: token(VIEW_STATE, &previous.view_state),
        view_state_generator: token(VIEW_STATE_GENERATOR, &previous.view_state_generator),
        event_validation: token(EVENT_VALIDATION, &previous.event_validation),
    }
}

/// Value of the first `<input name=...>` carrying a `value` attribute
fn hidden_field(document: &Html, name: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"input[name="{}"]"#, name)).ok()?;
    document
        .select(&selector)
        .find_map(|el| el.value().attr("value").map(str::to_string))
}

/// Fold `Set-Cookie` values into a `Cookie` header, replacing by name.
///
/// A cookie the server deletes (empty value, `Max-Age` of zero or less, or
/// an `Expires` in the past) is dropped from the jar.
fn merge_cookies(previous: &str, set_cookies: &[String]) -> String {
    let mut jar: Vec<(String, String)> = previous
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect();

    for header in set_cookies {
        // "name=value; Path=/; HttpOnly"
        let mut parts = header.split(';');
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() {
            continue;
        }
        if value.is_empty() || parts.any(is_expiry) {
            jar.retain(|(existing, _)| existing != name);
            continue;
        }
        match jar.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => jar.push((name.to_string(), value.to_string())),
        }
    }

    jar.iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Whether a cookie attribute marks the cookie as already expired
fn is_expiry(attribute: &str) -> bool {
    let Some((key, value)) = attribute.split_once('=') else {
        return false;
    };
    let value = value.trim();
    match key.trim().to_ascii_lowercase().as_str() {
        "max-age" => value.parse::<i64>().is_ok_and(|age| age <= 0),
        "expires" => DateTime::parse_from_rfc2822(value).is_ok_and(|at| at < Utc::now()),
        _ => false,
    }
}
