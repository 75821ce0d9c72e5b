//! Ingestion pipeline: CSV imports, scrape runs, and their scheduling.

mod csv_io;
mod ingest;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use jobwatch_adapters::{
    location_from_url, CountSource, HttpClientConfig, HttpFetcher, ListingHeadingSource, ListingTarget,
    RetryPolicy, DEFAULT_HEADING_SELECTOR, DEFAULT_LISTING_URLS, DEFAULT_USER_AGENT,
};
use jobwatch_core::ImportReport;
use jobwatch_storage::{RecordStore, StorageError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub use csv_io::{dedupe_csv, export_csv, import_csv_file, read_csv_rows, DedupeSummary, CSV_COLUMNS};
pub use ingest::{
    import_batch, normalize_row, parse_date, parse_job_count, ImportOptions, LocationNormalization, RawRow,
};

pub const CRATE_NAME: &str = "jobwatch-sync";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("input source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },
    #[error("input source {} is unreadable: {reason}", path.display())]
    SourceUnreadable { path: PathBuf, reason: String },
    #[error("{} lacks the date,location,job_count header (found {found:?})", path.display())]
    MissingColumns { path: PathBuf, found: Vec<String> },
    #[error("writing {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },
    #[error("storage failure after reading {read} rows ({rejected} rejected): {source}")]
    Storage {
        read: usize,
        rejected: usize,
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    Store(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct JobwatchConfig {
    pub database_path: PathBuf,
    pub csv_path: PathBuf,
    pub sources_path: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub scrape_cron: String,
    pub web_port: u16,
}

impl Default for JobwatchConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/jobwatch.sqlite3"),
            csv_path: PathBuf::from("data/data.csv"),
            sources_path: PathBuf::from("./sources.yaml"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 5,
            scheduler_enabled: false,
            scrape_cron: "0 0 6 * * *".to_string(),
            web_port: 8000,
        }
    }
}

impl JobwatchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: std::env::var("JOBWATCH_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            csv_path: std::env::var("JOBWATCH_CSV_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.csv_path),
            sources_path: std::env::var("JOBWATCH_SOURCES_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.sources_path),
            user_agent: std::env::var("JOBWATCH_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: std::env::var("JOBWATCH_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            scheduler_enabled: std::env::var("JOBWATCH_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.scheduler_enabled),
            scrape_cron: std::env::var("JOBWATCH_SCRAPE_CRON").unwrap_or(defaults.scrape_cron),
            web_port: std::env::var("JOBWATCH_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.web_port),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            retry: RetryPolicy::default(),
        }
    }
}

fn default_heading_selector() -> String {
    DEFAULT_HEADING_SELECTOR.to_string()
}

/// Contents of `sources.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegistry {
    #[serde(default = "default_heading_selector")]
    pub heading_selector: String,
    pub listing_urls: Vec<String>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self {
            heading_selector: default_heading_selector(),
            listing_urls: DEFAULT_LISTING_URLS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl SourceRegistry {
    /// Loads the registry, falling back to the built-in list when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no source registry file, using built-in sources");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn targets(&self) -> Vec<ListingTarget> {
        self.listing_urls
            .iter()
            .map(|url| ListingTarget {
                url: url.clone(),
                heading_selector: self.heading_selector.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeRunSummary {
    pub run_id: Uuid,
    pub run_date: NaiveDate,
    pub sources: usize,
    pub failed: Vec<SourceFailure>,
    pub report: ImportReport,
}

/// Fetches one count per source and upserts them under a single run date.
///
/// A failing source is logged and recorded; it never aborts the run.
pub async fn run_scrape(
    store: &RecordStore,
    sources: &[Arc<dyn CountSource>],
    run_date: NaiveDate,
) -> Result<ScrapeRunSummary, IngestError> {
    let run_id = Uuid::new_v4();
    let mut rows = Vec::with_capacity(sources.len());
    let mut failed = Vec::new();

    for source in sources {
        let url = source.url();
        let outcome = match location_from_url(url) {
            Ok(location) => source.fetch_count().await.map(|count| (location, count)),
            Err(err) => Err(err),
        };
        match outcome {
            Ok((location, count)) => {
                info!(%run_id, url, %location, count, "scraped job count");
                rows.push(RawRow::scraped(run_date, location, count));
            }
            Err(err) => {
                warn!(%run_id, url, error = %err, "skipping source");
                failed.push(SourceFailure {
                    url: url.to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }

    let report = import_batch(
        store,
        &rows,
        ImportOptions {
            normalization: LocationNormalization::Capitalize,
            clear_before_import: false,
        },
    )
    .await?;

    Ok(ScrapeRunSummary {
        run_id,
        run_date,
        sources: sources.len(),
        failed,
        report,
    })
}

/// Owns the store and HTTP client for repeated scrape runs.
pub struct ScrapePipeline {
    config: JobwatchConfig,
    store: RecordStore,
    sources: Vec<Arc<dyn CountSource>>,
}

impl ScrapePipeline {
    pub fn new(config: JobwatchConfig, store: RecordStore) -> Result<Self> {
        let registry = SourceRegistry::load(&config.sources_path)?;
        let http = Arc::new(HttpFetcher::new(config.http_client_config()).context("building http client")?);
        let sources = registry
            .targets()
            .into_iter()
            .map(|target| Arc::new(ListingHeadingSource::new(target, http.clone())) as Arc<dyn CountSource>)
            .collect();
        Ok(Self {
            config,
            store,
            sources,
        })
    }

    pub fn with_sources(mut self, sources: Vec<Arc<dyn CountSource>>) -> Self {
        self.sources = sources;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// One scrape run dated with today's local date.
    pub async fn run_once(&self) -> Result<ScrapeRunSummary> {
        let run_date = Local::now().date_naive();
        run_scrape(&self.store, &self.sources, run_date)
            .await
            .context("scrape run failed")
    }

    /// Builds a scheduler that scrapes once per cron tick, when scheduling is enabled.
    pub async fn maybe_build_scheduler(self: Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.scrape_cron.clone();
        let pipeline = self.clone();
        let job = Job::new_async(&cron, move |_uuid, _l| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        inserted = summary.report.inserted,
                        failed = summary.failed.len(),
                        "scheduled scrape finished"
                    ),
                    Err(err) => error!(error = %err, "scheduled scrape failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}
