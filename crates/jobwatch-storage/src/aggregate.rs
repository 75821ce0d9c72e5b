//! Derived, read-only views over the record store.

use jobwatch_core::{CitySummary, JobCountRecord, Overview};

use crate::{RecordStore, StorageError};

/// Latest snapshot: every record sharing the newest date, plus their total.
pub async fn overview(store: &RecordStore) -> Result<Overview, StorageError> {
    let Some(latest_date) = store.latest_date().await? else {
        return Ok(Overview::default());
    };
    let per_location_latest = store.records_for_date(latest_date).await?;
    let total_jobs = per_location_latest.iter().map(|r| r.job_count).sum();
    Ok(Overview {
        latest_date: Some(latest_date),
        total_jobs,
        per_location_latest,
    })
}

/// Full time series ordered by `(date, location)`, ready to be grouped per location.
pub async fn full_series(store: &RecordStore) -> Result<Vec<JobCountRecord>, StorageError> {
    store.all_records().await
}

/// One location's date-ascending records together with their summary.
#[derive(Debug, Clone, PartialEq)]
pub struct CityHistory {
    pub records: Vec<JobCountRecord>,
    pub summary: Option<CitySummary>,
}

/// Reads a location's series once and summarizes it.
pub async fn city_history(store: &RecordStore, location: &str) -> Result<CityHistory, StorageError> {
    let records = store.records_for_location(location).await?;
    let summary = CitySummary::from_series(location, &records);
    Ok(CityHistory { records, summary })
}

/// Current/average/max/min for one location, or `None` if it has no records.
pub async fn city_summary(store: &RecordStore, location: &str) -> Result<Option<CitySummary>, StorageError> {
    Ok(city_history(store, location).await?.summary)
}
