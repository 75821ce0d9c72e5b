//! Scrape-source contracts: fetch one job count for one listing page.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

pub const CRATE_NAME: &str = "jobwatch-adapters";

/// Heading that carries "<n> Jobs" on karriere.at listing pages.
pub const DEFAULT_HEADING_SELECTOR: &str = ".m-jobsListHeader__title";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

pub const DEFAULT_LISTING_URLS: [&str; 6] = [
    "https://www.karriere.at/jobs/controller/wien",
    "https://www.karriere.at/jobs/controller/linz",
    "https://www.karriere.at/jobs/controller/salzburg",
    "https://www.karriere.at/jobs/controller/graz",
    "https://www.karriere.at/jobs/controller/innsbruck",
    "https://www.karriere.at/jobs/controller/vorarlberg",
];

/// Fixed attempt budget: every attempt is a single GET, retried immediately on any failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("giving up on {url} after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: usize,
        last_error: String,
    },
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
    #[error("no element matches {selector:?}")]
    MissingHeading { selector: String },
    #[error("job count {0:?} does not fit an integer")]
    CountOverflow(String),
    #[error("cannot derive a location from {0:?}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().map_err(FetchError::Client)?;
        Ok(Self {
            client,
            retry: config.retry,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// GETs `url` until a 200 arrives or the attempt budget runs out.
    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let span = info_span!("http_fetch", url, attempt);
            match self.fetch_once(url).instrument(span).await {
                Ok(page) => return Ok(page),
                Err(reason) => {
                    warn!(url, attempt, error = %reason, "fetch attempt failed");
                    last_error = reason;
                }
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts,
            last_error,
        })
    }

    /// One GET including the body read. Any failure is reported as text for the retry loop.
    async fn fetch_once(&self, url: &str) -> Result<FetchedPage, String> {
        let resp = self.client.get(url).send().await.map_err(|err| err.to_string())?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(format!("status code {}", status.as_u16()));
        }
        let final_url = resp.url().to_string();
        let body = resp
            .bytes()
            .await
            .map_err(|err| format!("reading body: {err}"))?;
        Ok(FetchedPage {
            status,
            final_url,
            body: body.to_vec(),
        })
    }
}

/// Narrow capability used by scrape runs: one source, one count.
#[async_trait]
pub trait CountSource: Send + Sync {
    /// Identifier of the source, used for logging and location derivation.
    fn url(&self) -> &str;

    async fn fetch_count(&self) -> Result<i64, AdapterError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingTarget {
    pub url: String,
    pub heading_selector: String,
}

/// Listing page whose heading text starts with the number of open jobs.
#[derive(Debug, Clone)]
pub struct ListingHeadingSource {
    target: ListingTarget,
    http: Arc<HttpFetcher>,
}

impl ListingHeadingSource {
    pub fn new(target: ListingTarget, http: Arc<HttpFetcher>) -> Self {
        Self { target, http }
    }
}

#[async_trait]
impl CountSource for ListingHeadingSource {
    fn url(&self) -> &str {
        &self.target.url
    }

    async fn fetch_count(&self) -> Result<i64, AdapterError> {
        let page = self.http.fetch_page(&self.target.url).await?;
        let html = String::from_utf8_lossy(&page.body);
        extract_job_count(&html, &self.target.heading_selector)
    }
}

/// Pulls the first run of ASCII digits out of the first element matching `selector`.
///
/// A heading without digits counts as zero jobs; a missing heading is an error.
pub fn extract_job_count(html: &str, selector: &str) -> Result<i64, AdapterError> {
    let sel = Selector::parse(selector).map_err(|e| AdapterError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })?;
    let document = Html::parse_document(html);
    let heading = document
        .select(&sel)
        .next()
        .ok_or_else(|| AdapterError::MissingHeading {
            selector: selector.to_string(),
        })?;
    let text = heading.text().collect::<String>();
    match first_digit_run(text.trim()) {
        Some(digits) => digits
            .parse::<i64>()
            .map_err(|_| AdapterError::CountOverflow(digits.to_string())),
        None => Ok(0),
    }
}

fn first_digit_run(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Trailing path segment of a listing URL, verbatim (`.../controller/wien` -> `wien`).
pub fn location_from_url(url: &str) -> Result<String, AdapterError> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let path = without_fragment.split('?').next().unwrap_or(without_fragment);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .map(ToString::to_string)
        .ok_or_else(|| AdapterError::InvalidUrl(url.to_string()))
}
