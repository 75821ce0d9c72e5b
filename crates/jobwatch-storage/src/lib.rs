//! SQLite-backed record store for job-count facts, plus read-only aggregation views.

mod aggregate;

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use jobwatch_core::{format_date, JobCountRecord, NewJobCount, ValidationError, DATE_FORMAT};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

pub use aggregate::{city_history, city_summary, full_series, overview, CityHistory};

pub const CRATE_NAME: &str = "jobwatch-storage";

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS job_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date DATE NOT NULL,
        location VARCHAR(100) NOT NULL,
        job_count INTEGER NOT NULL,
        UNIQUE(date, location)
    )",
    "CREATE INDEX IF NOT EXISTS idx_date ON job_data(date)",
    "CREATE INDEX IF NOT EXISTS idx_location ON job_data(location)",
    "CREATE INDEX IF NOT EXISTS idx_date_location ON job_data(date, location)",
];

const INSERT_OR_IGNORE: &str =
    "INSERT OR IGNORE INTO job_data (date, location, job_count) VALUES (?1, ?2, ?3)";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("stored row {id} is unreadable: {reason}")]
    CorruptRow { id: i64, reason: String },
}

/// Durable keyed storage for `(date, location, job_count)` facts.
///
/// Every mutating call commits before returning. Cloning shares the underlying pool.
#[derive(Debug, Clone)]
pub struct RecordStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl RecordStore {
    /// Opens (creating if missing) the database file and bootstraps the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool, path };
        store.run_migrations().await?;
        info!(path = %store.path.display(), "record store opened");
        Ok(store)
    }

    /// Creates the table and indexes if they do not exist yet.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(self) {
        self.pool.close().await;
        debug!(path = %self.path.display(), "record store closed");
    }

    /// Inserts one fact unless its `(date, location)` key exists. Returns whether a row was written.
    pub async fn insert_or_ignore(&self, record: &NewJobCount) -> Result<bool, StorageError> {
        record.validate()?;
        let result = sqlx::query(INSERT_OR_IGNORE)
            .bind(format_date(record.date))
            .bind(&record.location)
            .bind(record.job_count)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Applies `insert_or_ignore` semantics row by row inside one transaction.
    ///
    /// Invalid rows and duplicate keys are skipped; the rest commit together.
    pub async fn bulk_insert_or_ignore(&self, records: &[NewJobCount]) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for record in records {
            if let Err(err) = record.validate() {
                warn!(date = %record.date, location = %record.location, %err, "skipping invalid record");
                continue;
            }
            let result = sqlx::query(INSERT_OR_IGNORE)
                .bind(format_date(record.date))
                .bind(&record.location)
                .bind(record.job_count)
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        debug!(offered = records.len(), inserted, "bulk insert committed");
        Ok(inserted)
    }

    pub async fn latest_date(&self) -> Result<Option<NaiveDate>, StorageError> {
        let row = sqlx::query("SELECT MAX(date) AS max_date FROM job_data")
            .fetch_one(&self.pool)
            .await?;
        let max_date: Option<String> = row.try_get("max_date")?;
        max_date
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| StorageError::CorruptRow {
                    id: 0,
                    reason: format!("max(date) {raw:?}: {e}"),
                })
            })
            .transpose()
    }

    /// Records of one date, largest `job_count` first, ties in insertion order.
    pub async fn records_for_date(&self, date: NaiveDate) -> Result<Vec<JobCountRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, date, location, job_count
              FROM job_data
             WHERE date = ?1
             ORDER BY job_count DESC, id ASC
            "#,
        )
        .bind(format_date(date))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Every record ordered by `(date, location)` ascending.
    pub async fn all_records(&self) -> Result<Vec<JobCountRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, date, location, job_count
              FROM job_data
             ORDER BY date ASC, location ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Records of one location (exact match), oldest first.
    pub async fn records_for_location(&self, location: &str) -> Result<Vec<JobCountRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, date, location, job_count
              FROM job_data
             WHERE location = ?1
             ORDER BY date ASC
            "#,
        )
        .bind(location)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Distinct locations, ascending.
    pub async fn locations(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT DISTINCT location FROM job_data ORDER BY location ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("location").map_err(StorageError::from))
            .collect()
    }

    /// Removes every record. Irreversible.
    pub async fn clear_all(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM job_data").execute(&self.pool).await?;
        let deleted = result.rows_affected();
        warn!(deleted, "cleared all job-count records");
        Ok(deleted)
    }

    pub async fn count(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM job_data")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<JobCountRecord, StorageError> {
    let id: i64 = row.try_get("id")?;
    let raw_date: String = row.try_get("date")?;
    let date = NaiveDate::parse_from_str(&raw_date, DATE_FORMAT).map_err(|e| StorageError::CorruptRow {
        id,
        reason: format!("date {raw_date:?}: {e}"),
    })?;
    Ok(JobCountRecord {
        id,
        date,
        location: row.try_get("location")?,
        job_count: row.try_get("job_count")?,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    pub async fn temp_store() -> (TempDir, RecordStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path().join("jobwatch.sqlite3"))
            .await
            .expect("open store");
        (dir, store)
    }

    pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{day, temp_store};
    use super::*;

    #[tokio::test]
    async fn duplicate_key_is_ignored_and_first_value_wins() {
        let (_dir, store) = temp_store().await;
        let first = NewJobCount::new(day(2024, 1, 1), "Wien", 100);
        let second = NewJobCount::new(day(2024, 1, 1), "Wien", 250);

        assert!(store.insert_or_ignore(&first).await.unwrap());
        assert!(!store.insert_or_ignore(&second).await.unwrap());

        let rows = store.records_for_location("Wien").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_count, 100);
    }

    #[tokio::test]
    async fn insert_rejects_invalid_rows_without_writing() {
        let (_dir, store) = temp_store().await;
        let err = store
            .insert_or_ignore(&NewJobCount::new(day(2024, 1, 1), "", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(ValidationError::EmptyLocation)));

        let err = store
            .insert_or_ignore(&NewJobCount::new(day(2024, 1, 1), "Linz", -4))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::NegativeJobCount(-4))
        ));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bulk_insert_skips_duplicates_inside_and_across_batches() {
        let (_dir, store) = temp_store().await;
        store
            .insert_or_ignore(&NewJobCount::new(day(2024, 1, 1), "Graz", 10))
            .await
            .unwrap();

        let batch = vec![
            NewJobCount::new(day(2024, 1, 1), "Graz", 99),
            NewJobCount::new(day(2024, 1, 1), "Wien", 100),
            NewJobCount::new(day(2024, 1, 1), "Wien", 100),
            NewJobCount::new(day(2024, 1, 2), "Linz", 50),
            NewJobCount::new(day(2024, 1, 2), "", 5),
        ];
        let inserted = store.bulk_insert_or_ignore(&batch).await.unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.count().await.unwrap(), 3);

        let graz = store.records_for_location("Graz").await.unwrap();
        assert_eq!(graz[0].job_count, 10);
    }

    #[tokio::test]
    async fn latest_date_is_none_on_empty_store() {
        let (_dir, store) = temp_store().await;
        assert_eq!(store.latest_date().await.unwrap(), None);
        store
            .insert_or_ignore(&NewJobCount::new(day(2024, 3, 9), "Wien", 1))
            .await
            .unwrap();
        store
            .insert_or_ignore(&NewJobCount::new(day(2024, 11, 2), "Wien", 1))
            .await
            .unwrap();
        assert_eq!(store.latest_date().await.unwrap(), Some(day(2024, 11, 2)));
    }

    #[tokio::test]
    async fn records_for_date_orders_by_count_then_insertion() {
        let (_dir, store) = temp_store().await;
        let d = day(2024, 5, 1);
        for (location, count) in [("Linz", 20), ("Wien", 80), ("Graz", 20), ("Salzburg", 40)] {
            store
                .insert_or_ignore(&NewJobCount::new(d, location, count))
                .await
                .unwrap();
        }
        let names: Vec<_> = store
            .records_for_date(d)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.location)
            .collect();
        assert_eq!(names, vec!["Wien", "Salzburg", "Linz", "Graz"]);
    }

    #[tokio::test]
    async fn all_records_sorted_by_date_then_location() {
        let (_dir, store) = temp_store().await;
        let batch = vec![
            NewJobCount::new(day(2024, 1, 2), "Wien", 1),
            NewJobCount::new(day(2024, 1, 1), "Wien", 2),
            NewJobCount::new(day(2024, 1, 2), "Graz", 3),
            NewJobCount::new(day(2024, 1, 1), "Linz", 4),
        ];
        store.bulk_insert_or_ignore(&batch).await.unwrap();
        let keys: Vec<_> = store
            .all_records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.date, r.location))
            .collect();
        assert_eq!(
            keys,
            vec![
                (day(2024, 1, 1), "Linz".to_string()),
                (day(2024, 1, 1), "Wien".to_string()),
                (day(2024, 1, 2), "Graz".to_string()),
                (day(2024, 1, 2), "Wien".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn location_lookup_is_exact_match() {
        let (_dir, store) = temp_store().await;
        store
            .insert_or_ignore(&NewJobCount::new(day(2024, 1, 1), "wien", 1))
            .await
            .unwrap();
        store
            .insert_or_ignore(&NewJobCount::new(day(2024, 1, 1), "Wien", 2))
            .await
            .unwrap();
        let rows = store.records_for_location("Wien").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_count, 2);
        assert_eq!(store.locations().await.unwrap(), vec!["Wien", "wien"]);
    }

    #[tokio::test]
    async fn clear_all_reports_deleted_rows_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.sqlite3");
        let store = RecordStore::open(&path).await.unwrap();
        store
            .bulk_insert_or_ignore(&[
                NewJobCount::new(day(2024, 1, 1), "Wien", 1),
                NewJobCount::new(day(2024, 1, 1), "Linz", 2),
            ])
            .await
            .unwrap();
        store.close().await;

        let reopened = RecordStore::open(&path).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 2);
        assert_eq!(reopened.clear_all().await.unwrap(), 2);
        assert_eq!(reopened.count().await.unwrap(), 0);
    }
}
