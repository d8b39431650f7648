//! HTTP exchanges with the price query page

use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{COOKIE, SET_COOKIE};
use std::time::Duration;

use crate::config::CrawlConfig;
use crate::error::TransportError;

/// Raw outcome of one successful request/response cycle
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    pub body: String,
    /// Raw `Set-Cookie` header values, in arrival order
    pub set_cookies: Vec<String>,
}

/// The form-based endpoint the crawler talks to.
///
/// Implementations perform exactly one request per call and never retry;
/// retrying is the next run's job.
pub trait Source {
    /// Unauthenticated GET of the query page
    fn landing(&self) -> Result<Exchange, TransportError>;

    /// POST a form back to the query page, sending `cookies` verbatim
    fn submit(&self, form: &[(&str, String)], cookies: &str) -> Result<Exchange, TransportError>;
}

pub struct HttpSource {
    client: Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }
}

impl Source for HttpSource {
    fn landing(&self) -> Result<Exchange, TransportError> {
        let response = self.client.get(&self.base_url).send()?;
        read_exchange(response)
    }

    fn submit(&self, form: &[(&str, String)], cookies: &str) -> Result<Exchange, TransportError> {
        let mut request = self.client.post(&self.base_url).form(form);
        if !cookies.is_empty() {
            request = request.header(COOKIE, cookies);
        }
        read_exchange(request.send()?)
    }
}

fn read_exchange(response: Response) -> Result<Exchange, TransportError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status(status));
    }

    let set_cookies = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();
    let body = response.text()?;

    Ok(Exchange { body, set_cookies })
}
