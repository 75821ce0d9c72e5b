//! Row normalization and the idempotent import batch.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use jobwatch_core::{format_date, ImportReport, NewJobCount, RowRejection, ValidationError};
use jobwatch_storage::{RecordStore, StorageError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Instrument};

use crate::IngestError;

/// One untyped input row, as read from a CSV file or produced by a scrape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    pub date: String,
    pub location: String,
    pub job_count: String,
    /// First column whose bytes were not UTF-8; such a row is rejected, never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undecodable: Option<String>,
}

impl RawRow {
    pub fn new(date: impl Into<String>, location: impl Into<String>, job_count: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            location: location.into(),
            job_count: job_count.into(),
            undecodable: None,
        }
    }

    pub fn scraped(date: NaiveDate, location: impl Into<String>, job_count: i64) -> Self {
        Self::new(format_date(date), location, job_count.to_string())
    }
}

/// How the location column is rewritten before it reaches the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationNormalization {
    /// CSV imports keep the location exactly as written.
    #[default]
    Verbatim,
    /// Scrape runs upper-case the first character and lower-case the rest (`wien` -> `Wien`).
    Capitalize,
}

impl LocationNormalization {
    pub fn apply(self, location: &str) -> String {
        match self {
            Self::Verbatim => location.to_string(),
            Self::Capitalize => capitalize(location),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    pub normalization: LocationNormalization,
    pub clear_before_import: bool,
}

fn capitalize(input: &str) -> String {
    let mut chars = input.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(input.len());
            out.extend(first.to_uppercase());
            out.push_str(&chars.as_str().to_lowercase());
            out
        }
        None => String::new(),
    }
}

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%m/%d/%Y"];

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parses a free-form date or timestamp down to its calendar date.
pub fn parse_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    let text = raw.trim();
    let invalid = || ValidationError::InvalidDate(raw.to_string());
    if text.is_empty() {
        return Err(invalid());
    }

    if text.bytes().all(|b| b.is_ascii_digit()) {
        return match text.len() {
            8 => NaiveDate::parse_from_str(text, "%Y%m%d").map_err(|_| invalid()),
            9 | 10 => {
                let secs: i64 = text.parse().map_err(|_| invalid())?;
                DateTime::from_timestamp(secs, 0)
                    .map(|dt| dt.date_naive())
                    .ok_or_else(invalid)
            }
            _ => Err(invalid()),
        };
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Ok(date);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.date_naive());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt.date());
        }
    }
    Err(invalid())
}

/// Integer coercion: `"42"`, `" +42 "`, and integral floats such as `"42.0"`.
pub fn parse_job_count(raw: &str) -> Result<i64, ValidationError> {
    let text = raw.trim();
    let invalid = || ValidationError::InvalidJobCount(raw.to_string());
    let unsigned = text.strip_prefix('+').unwrap_or(text);
    if let Ok(value) = unsigned.parse::<i64>() {
        return Ok(value);
    }
    let value: f64 = unsigned.parse().map_err(|_| invalid())?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Ok(value as i64)
    } else {
        Err(invalid())
    }
}

/// Turns a raw row into a validated record.
pub fn normalize_row(row: &RawRow, normalization: LocationNormalization) -> Result<NewJobCount, ValidationError> {
    if let Some(column) = &row.undecodable {
        return Err(ValidationError::InvalidEncoding(column.clone()));
    }
    let date = parse_date(&row.date)?;
    let job_count = parse_job_count(&row.job_count)?;
    let record = NewJobCount::new(date, normalization.apply(&row.location), job_count);
    record.validate()?;
    Ok(record)
}

/// Validates every row, optionally clears the store, and upserts what parsed.
///
/// Bad rows are rejected locally and itemized; duplicates are skipped silently.
pub async fn import_batch(
    store: &RecordStore,
    rows: &[RawRow],
    options: ImportOptions,
) -> Result<ImportReport, IngestError> {
    let span = info_span!("import_batch", rows = rows.len());
    async move {
        let mut report = ImportReport {
            read: rows.len(),
            ..ImportReport::default()
        };

        let mut records = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            match normalize_row(row, options.normalization) {
                Ok(record) => records.push(record),
                Err(err) => {
                    debug!(row = idx + 1, %err, "rejecting row");
                    report.rejected.push(RowRejection {
                        row: idx + 1,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if options.clear_before_import {
            let deleted = store
                .clear_all()
                .await
                .map_err(|source| storage_failure(source, &report))?;
            report.deleted = Some(deleted);
        }

        let inserted = store
            .bulk_insert_or_ignore(&records)
            .await
            .map_err(|source| storage_failure(source, &report))?;
        report.inserted = inserted as usize;
        report.duplicates = records.len() - report.inserted;
        report.skipped = report.read - report.inserted;

        info!(
            read = report.read,
            inserted = report.inserted,
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            "import batch committed"
        );
        Ok(report)
    }
    .instrument(span)
    .await
}

fn storage_failure(source: StorageError, report: &ImportReport) -> IngestError {
    IngestError::Storage {
        read: report.read,
        rejected: report.rejected.len(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{day, temp_store};

    #[test]
    fn dates_accept_common_layouts() {
        let jan5 = day(2024, 1, 5);
        for raw in [
            "2024-01-05",
            " 2024-01-05 ",
            "2024/01/05",
            "05.01.2024",
            "01/05/2024",
            "20240105",
            "2024-01-05 10:30:00",
            "2024-01-05 10:30",
            "2024-01-05T10:30:00",
            "2024-01-05T10:30:00.250",
            "2024-01-05T10:30:00+01:00",
            "1704448800",
        ] {
            assert_eq!(parse_date(raw).unwrap(), jan5, "{raw}");
        }
    }

    #[test]
    fn unparseable_dates_are_rejected() {
        for raw in [
            "",
            "yesterday",
            "2024-13-01",
            "2024-02-30",
            "123456789012",
            "20241399",
            "2024",
            "12345",
        ] {
            assert!(parse_date(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn job_count_coercion() {
        assert_eq!(parse_job_count("42").unwrap(), 42);
        assert_eq!(parse_job_count(" +42 ").unwrap(), 42);
        assert_eq!(parse_job_count("42.0").unwrap(), 42);
        assert_eq!(parse_job_count("-3").unwrap(), -3);
        assert!(parse_job_count("42.5").is_err());
        assert!(parse_job_count("many").is_err());
        assert!(parse_job_count("").is_err());
    }

    #[test]
    fn capitalize_matches_scrape_convention() {
        let cap = LocationNormalization::Capitalize;
        assert_eq!(cap.apply("wien"), "Wien");
        assert_eq!(cap.apply("VORARLBERG"), "Vorarlberg");
        assert_eq!(cap.apply("österreich"), "Österreich");
        assert_eq!(cap.apply(""), "");
        assert_eq!(LocationNormalization::Verbatim.apply(" wien "), " wien ");
    }

    #[test]
    fn negative_counts_fail_validation() {
        let err = normalize_row(&RawRow::new("2024-01-01", "Wien", "-1"), LocationNormalization::Verbatim)
            .unwrap_err();
        assert_eq!(err, ValidationError::NegativeJobCount(-1));
    }

    #[tokio::test]
    async fn end_to_end_example_batch() {
        let (_dir, store) = temp_store().await;
        let rows = vec![
            RawRow::new("2024-01-01", "Wien", "100"),
            RawRow::new("2024-01-01", "Wien", "100"),
            RawRow::new("2024-01-02", "Linz", "50"),
        ];
        let report = import_batch(&store, &rows, ImportOptions::default()).await.unwrap();
        assert_eq!((report.read, report.inserted, report.skipped), (3, 2, 1));
        assert_eq!(report.duplicates, 1);
        assert!(report.is_balanced());
        assert_eq!(store.count().await.unwrap(), 2);

        let view = jobwatch_storage::overview(&store).await.unwrap();
        assert_eq!(view.latest_date, Some(day(2024, 1, 2)));
        assert_eq!(view.total_jobs, 50);
        assert_eq!(view.per_location_latest.len(), 1);
        assert_eq!(view.per_location_latest[0].location, "Linz");
    }

    #[tokio::test]
    async fn reimport_is_idempotent() {
        let (_dir, store) = temp_store().await;
        let rows = vec![
            RawRow::new("2024-01-01", "Wien", "100"),
            RawRow::new("2024-01-02", "Wien", "110"),
        ];
        let first = import_batch(&store, &rows, ImportOptions::default()).await.unwrap();
        let second = import_batch(&store, &rows, ImportOptions::default()).await.unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn bad_rows_are_itemized_and_do_not_abort() {
        let (_dir, store) = temp_store().await;
        let rows = vec![
            RawRow::new("not a date", "Wien", "1"),
            RawRow::new("2024-01-01", "Wien", "lots"),
            RawRow::new("2024-01-01", "", "3"),
            RawRow::new("2024-01-01", "Graz", "4"),
        ];
        let report = import_batch(&store, &rows, ImportOptions::default()).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.duplicates, 0);
        let rejected_rows: Vec<_> = report.rejected.iter().map(|r| r.row).collect();
        assert_eq!(rejected_rows, vec![1, 2, 3]);
        assert!(report.rejected[0].reason.contains("date"));
        assert!(report.is_balanced());
    }

    #[tokio::test]
    async fn clear_before_import_reports_deleted_rows() {
        let (_dir, store) = temp_store().await;
        let old = vec![
            RawRow::new("2023-12-01", "Wien", "90"),
            RawRow::new("2023-12-01", "Linz", "40"),
        ];
        import_batch(&store, &old, ImportOptions::default()).await.unwrap();

        let fresh = vec![RawRow::new("2024-01-01", "Wien", "100")];
        let report = import_batch(
            &store,
            &fresh,
            ImportOptions {
                clear_before_import: true,
                ..ImportOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(report.deleted, Some(2));
        assert_eq!(report.inserted, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
