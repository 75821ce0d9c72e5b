//! CSV file import, export and cleanup.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use jobwatch_core::{format_date, ImportReport};
use jobwatch_storage::RecordStore;
use serde::Serialize;
use tracing::info;

use crate::ingest::{import_batch, ImportOptions, RawRow};
use crate::IngestError;

pub const CSV_COLUMNS: [&str; 3] = ["date", "location", "job_count"];

/// Reads every data row of a `date,location,job_count` file.
///
/// Extra columns are ignored and short rows yield empty fields, which fail validation
/// later on a per-row basis, as do fields that are not UTF-8. Only a missing or
/// unreadable file or header is fatal.
pub fn read_csv_rows(path: &Path) -> Result<Vec<RawRow>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|err| source_error(path, err))?;

    let headers = reader.byte_headers().map_err(|err| source_error(path, err))?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| String::from_utf8_lossy(h).trim() == name)
    };
    let (Some(date_idx), Some(location_idx), Some(count_idx)) =
        (column("date"), column("location"), column("job_count"))
    else {
        let found = headers
            .iter()
            .map(|h| String::from_utf8_lossy(h).into_owned())
            .collect::<Vec<_>>();
        return Err(IngestError::MissingColumns {
            path: path.to_path_buf(),
            found,
        });
    };

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(|err| source_error(path, err))?;
        let mut undecodable = None;
        let mut field = |idx: usize, column: &str| {
            let bytes = record.get(idx).unwrap_or_default();
            match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(_) => {
                    undecodable.get_or_insert_with(|| column.to_string());
                    String::from_utf8_lossy(bytes).into_owned()
                }
            }
        };
        let date = field(date_idx, "date");
        let location = field(location_idx, "location");
        let job_count = field(count_idx, "job_count");
        rows.push(RawRow {
            date,
            location,
            job_count,
            undecodable,
        });
    }
    Ok(rows)
}

/// Reads `path` and runs it through [`import_batch`] with verbatim locations.
pub async fn import_csv_file(
    store: &RecordStore,
    path: &Path,
    clear_before_import: bool,
) -> Result<ImportReport, IngestError> {
    let rows = read_csv_rows(path)?;
    info!(path = %path.display(), rows = rows.len(), "read csv");
    import_batch(
        store,
        &rows,
        ImportOptions {
            clear_before_import,
            ..ImportOptions::default()
        },
    )
    .await
}

/// Writes every stored record to `path` as `date,location,job_count`, oldest first.
pub async fn export_csv(store: &RecordStore, path: &Path) -> Result<usize, IngestError> {
    let records = store.all_records().await?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| IngestError::Write {
            path: parent.to_path_buf(),
            reason: err.to_string(),
        })?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(|err| sink_error(path, err))?;
    writer.write_record(CSV_COLUMNS).map_err(|err| sink_error(path, err))?;
    for record in &records {
        writer
            .write_record([
                format_date(record.date),
                record.location.clone(),
                record.job_count.to_string(),
            ])
            .map_err(|err| sink_error(path, err))?;
    }
    writer.flush().map_err(|err| IngestError::Write {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    info!(path = %path.display(), rows = records.len(), "exported csv");
    Ok(records.len())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupeSummary {
    pub original_rows: usize,
    pub duplicates_removed: usize,
    pub final_rows: usize,
    pub output: PathBuf,
}

/// Drops exact duplicate rows, keeping the header and first occurrences in order.
/// Overwrites `input` when no `output` is given.
pub fn dedupe_csv(input: &Path, output: Option<&Path>) -> Result<DedupeSummary, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(input)
        .map_err(|err| source_error(input, err))?;
    let headers = reader.byte_headers().map_err(|err| source_error(input, err))?.clone();

    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut original_rows = 0usize;
    for record in reader.byte_records() {
        let record = record.map_err(|err| source_error(input, err))?;
        original_rows += 1;
        let key = record.iter().map(<[u8]>::to_vec).collect::<Vec<_>>();
        if seen.insert(key) {
            kept.push(record);
        }
    }
    drop(reader);

    let output = output.unwrap_or(input).to_path_buf();
    let mut writer = csv::Writer::from_path(&output).map_err(|err| sink_error(&output, err))?;
    writer.write_byte_record(&headers).map_err(|err| sink_error(&output, err))?;
    for record in &kept {
        writer
            .write_byte_record(record)
            .map_err(|err| sink_error(&output, err))?;
    }
    writer.flush().map_err(|err| IngestError::Write {
        path: output.clone(),
        reason: err.to_string(),
    })?;

    Ok(DedupeSummary {
        original_rows,
        duplicates_removed: original_rows - kept.len(),
        final_rows: kept.len(),
        output,
    })
}

fn source_error(path: &Path, err: csv::Error) -> IngestError {
    if let csv::ErrorKind::Io(io) = err.kind() {
        if io.kind() == ErrorKind::NotFound {
            return IngestError::SourceNotFound {
                path: path.to_path_buf(),
            };
        }
    }
    IngestError::SourceUnreadable {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn sink_error(path: &Path, err: csv::Error) -> IngestError {
    IngestError::Write {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{day, temp_store};

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn importing_same_file_twice_inserts_nothing_new() {
        let (dir, store) = temp_store().await;
        let csv = write(
            dir.path(),
            "data.csv",
            "date,location,job_count\n2024-01-01,Wien,100\n2024-01-01,Wien,100\n2024-01-02,Linz,50\n",
        );

        let first = import_csv_file(&store, &csv, false).await.unwrap();
        assert_eq!((first.read, first.inserted, first.skipped), (3, 2, 1));

        let second = import_csv_file(&store, &csv, false).await.unwrap();
        assert_eq!((second.read, second.inserted, second.skipped), (3, 0, 3));
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn csv_locations_are_kept_verbatim_and_columns_may_be_reordered() {
        let (dir, store) = temp_store().await;
        let csv = write(
            dir.path(),
            "data.csv",
            "job_count,extra,location,date\n12,x,wien ,2024-01-01\n7\n",
        );
        let report = import_csv_file(&store, &csv, false).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].row, 2);
        assert_eq!(store.records_for_location("wien ").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_fatal() {
        let (dir, store) = temp_store().await;
        let err = import_csv_file(&store, &dir.path().join("nope.csv"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::SourceNotFound { .. }));
    }

    #[tokio::test]
    async fn missing_columns_are_fatal() {
        let (dir, store) = temp_store().await;
        let csv = write(dir.path(), "bad.csv", "when,where\n2024-01-01,Wien\n");
        let err = import_csv_file(&store, &csv, false).await.unwrap_err();
        match err {
            IngestError::MissingColumns { found, .. } => assert_eq!(found, vec!["when", "where"]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn export_then_reimport_round_trips_the_store() {
        let (dir, store) = temp_store().await;
        store
            .bulk_insert_or_ignore(&[
                jobwatch_core::NewJobCount::new(day(2024, 1, 2), "Wien", 3),
                jobwatch_core::NewJobCount::new(day(2024, 1, 1), "Graz", 4),
            ])
            .await
            .unwrap();
        let out = dir.path().join("export").join("data.csv");
        assert_eq!(export_csv(&store, &out).await.unwrap(), 2);
        let text = std::fs::read_to_string(&out).unwrap();
        assert_eq!(text, "date,location,job_count\n2024-01-01,Graz,4\n2024-01-02,Wien,3\n");
    }

    #[test]
    fn dedupe_keeps_first_occurrences() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(
            dir.path(),
            "data.csv",
            "date,location,job_count\n2024-01-01,Wien,1\n2024-01-01,Linz,2\n2024-01-01,Wien,1\n2024-01-01,Wien,5\n",
        );
        let summary = dedupe_csv(&input, None).unwrap();
        assert_eq!(summary.original_rows, 4);
        assert_eq!(summary.duplicates_removed, 1);
        assert_eq!(summary.final_rows, 3);
        assert_eq!(
            std::fs::read_to_string(&input).unwrap(),
            "date,location,job_count\n2024-01-01,Wien,1\n2024-01-01,Linz,2\n2024-01-01,Wien,5\n"
        );
    }

    #[tokio::test]
    async fn non_utf8_locations_are_rejected_not_merged() {
        let (dir, store) = temp_store().await;
        let path = dir.path().join("latin1.csv");
        std::fs::write(
            &path,
            b"date,location,job_count\n2024-01-01,P\xF6lten,10\n2024-01-01,P\xFClten,20\n2024-01-01,Wien,30\n",
        )
        .unwrap();

        let report = import_csv_file(&store, &path, false).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 0);
        let rejected: Vec<_> = report.rejected.iter().map(|r| r.row).collect();
        assert_eq!(rejected, vec![1, 2]);
        assert!(report.rejected[0].reason.contains("location"));
        assert!(report.is_balanced());
        assert_eq!(store.locations().await.unwrap(), vec!["Wien"]);
    }
}
