//! Core domain model for Job Market Watch: one job-count fact per date and location.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "jobwatch-core";

/// Calendar-date layout used for persistence and display.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("location must not be empty")]
    EmptyLocation,
    #[error("job_count must be non-negative, got {0}")]
    NegativeJobCount(i64),
    #[error("unparseable date {0:?}")]
    InvalidDate(String),
    #[error("job_count is not an integer: {0:?}")]
    InvalidJobCount(String),
    #[error("{0} is not valid UTF-8")]
    InvalidEncoding(String),
}

/// A persisted job-count fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCountRecord {
    pub id: i64,
    pub date: NaiveDate,
    pub location: String,
    pub job_count: i64,
}

/// A typed, not-yet-persisted fact handed from ingestion to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJobCount {
    pub date: NaiveDate,
    pub location: String,
    pub job_count: i64,
}

impl NewJobCount {
    pub fn new(date: NaiveDate, location: impl Into<String>, job_count: i64) -> Self {
        Self {
            date,
            location: location.into(),
            job_count,
        }
    }

    /// Checks the store's admission rules. The location is not trimmed or re-cased.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.location.is_empty() {
            return Err(ValidationError::EmptyLocation);
        }
        if self.job_count < 0 {
            return Err(ValidationError::NegativeJobCount(self.job_count));
        }
        Ok(())
    }
}

/// Why a single input row did not reach the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowRejection {
    /// 1-based position among the data rows (header excluded).
    pub row: usize,
    pub reason: String,
}

/// Per-run totals for one ingestion batch.
///
/// `read == inserted + skipped` holds for every report; `skipped` is further split into
/// `duplicates` (key already present, or repeated within the batch) and `rejected` rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub read: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub rejected: Vec<RowRejection>,
    pub deleted: Option<u64>,
}

impl ImportReport {
    pub fn is_balanced(&self) -> bool {
        self.read == self.inserted + self.skipped
            && self.skipped == self.duplicates + self.rejected.len()
    }
}

/// Latest-snapshot view for the dashboard landing page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Overview {
    pub latest_date: Option<NaiveDate>,
    pub total_jobs: i64,
    pub per_location_latest: Vec<JobCountRecord>,
}

/// Summary statistics over every record of one location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitySummary {
    pub location: String,
    pub current: i64,
    pub average: f64,
    pub max: i64,
    pub min: i64,
    pub latest_date: NaiveDate,
    pub observations: usize,
}

impl CitySummary {
    /// Builds the summary from date-ascending records; `None` when there are none.
    pub fn from_series(location: &str, records: &[JobCountRecord]) -> Option<Self> {
        let last = records.last()?;
        let counts = records.iter().map(|r| r.job_count);
        let sum: i64 = counts.clone().sum();
        Some(Self {
            location: location.to_string(),
            current: last.job_count,
            average: sum as f64 / records.len() as f64,
            max: counts.clone().max().unwrap_or(last.job_count),
            min: counts.min().unwrap_or(last.job_count),
            latest_date: last.date,
            observations: records.len(),
        })
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}
