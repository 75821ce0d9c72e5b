use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobwatch_core::ImportReport;
use jobwatch_storage::RecordStore;
use jobwatch_sync::{dedupe_csv, export_csv, import_csv_file, JobwatchConfig, ScrapePipeline};
use jobwatch_web::AppState;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "warn,jobwatch_core=info,jobwatch_storage=info,jobwatch_adapters=info,jobwatch_sync=info,jobwatch_web=info,jobwatch_cli=info";

#[derive(Debug, Parser)]
#[command(name = "jobwatch-cli")]
#[command(about = "Job Market Watch command-line interface")]
struct Cli {
    /// SQLite database file (overrides JOBWATCH_DATABASE_PATH).
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Scrape source registry (overrides JOBWATCH_SOURCES_PATH).
    #[arg(long, global = true)]
    sources: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import a date,location,job_count CSV file.
    Import {
        #[arg(long)]
        file: Option<PathBuf>,
        /// Delete every stored record before importing.
        #[arg(long)]
        clear: bool,
    },
    /// Scrape every configured source once.
    Scrape {
        /// Also write the full store to this CSV file afterwards.
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Write every stored record to a CSV file.
    Export {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Remove exact duplicate rows from a CSV file.
    Dedupe {
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Migrate,
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the cron scheduler until interrupted.
    Schedule,
}

impl Cli {
    fn config(&self) -> JobwatchConfig {
        let mut config = JobwatchConfig::from_env();
        if let Some(db) = &self.db {
            config.database_path = db.clone();
        }
        if let Some(sources) = &self.sources {
            config.sources_path = sources.clone();
        }
        config
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_import_summary(report: &ImportReport) {
    println!("rows found: {}", report.read);
    println!("records imported: {}", report.inserted);
    println!("records skipped: {}", report.skipped);
    if let Some(deleted) = report.deleted {
        println!("records deleted: {deleted}");
    }
    for rejection in &report.rejected {
        println!("  row {}: {}", rejection.row, rejection.reason);
    }
}

async fn open_store(config: &JobwatchConfig) -> Result<RecordStore> {
    RecordStore::open(&config.database_path)
        .await
        .with_context(|| format!("opening database {}", config.database_path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = cli.config();

    let command = cli.command.unwrap_or(Commands::Import {
        file: None,
        clear: false,
    });

    match command {
        Commands::Import { file, clear } => {
            let path = file.unwrap_or_else(|| config.csv_path.clone());
            let store = open_store(&config).await?;
            let report = import_csv_file(&store, &path, clear)
                .await
                .with_context(|| format!("importing {}", path.display()))?;
            print_import_summary(&report);
            store.close().await;
        }
        Commands::Scrape { export } => {
            let store = open_store(&config).await?;
            let pipeline = ScrapePipeline::new(config, store.clone())?;
            let summary = pipeline.run_once().await?;
            println!(
                "scrape complete: run_id={} date={} sources={} failed={}",
                summary.run_id,
                summary.run_date,
                summary.sources,
                summary.failed.len()
            );
            for failure in &summary.failed {
                println!("  {}: {}", failure.url, failure.reason);
            }
            print_import_summary(&summary.report);
            if let Some(path) = export {
                let rows = export_csv(&store, &path).await?;
                println!("exported {rows} records to {}", path.display());
            }
            store.close().await;
        }
        Commands::Export { file } => {
            let path = file.unwrap_or_else(|| config.csv_path.clone());
            let store = open_store(&config).await?;
            let rows = export_csv(&store, &path).await?;
            println!("exported {rows} records to {}", path.display());
            store.close().await;
        }
        Commands::Dedupe { file, output } => {
            let path = file.unwrap_or_else(|| config.csv_path.clone());
            let summary = dedupe_csv(&path, output.as_deref())?;
            println!("original rows: {}", summary.original_rows);
            println!("duplicates removed: {}", summary.duplicates_removed);
            println!("final rows: {}", summary.final_rows);
            println!("written to {}", summary.output.display());
        }
        Commands::Migrate => {
            let store = open_store(&config).await?;
            store.run_migrations().await.context("applying schema")?;
            println!("schema ready at {}", store.path().display());
            store.close().await;
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.web_port);
            let store = open_store(&config).await?;
            jobwatch_web::serve(AppState::new(store, "."), port).await?;
        }
        Commands::Schedule => {
            config.scheduler_enabled = true;
            let store = open_store(&config).await?;
            let pipeline = Arc::new(ScrapePipeline::new(config, store)?);
            let Some(mut sched) = pipeline.maybe_build_scheduler().await? else {
                anyhow::bail!("scheduler is disabled");
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_flags_parse() {
        let cli = Cli::try_parse_from(["jobwatch-cli", "import", "--file", "x.csv", "--clear"]).unwrap();
        match cli.command {
            Some(Commands::Import { file, clear }) => {
                assert_eq!(file, Some(PathBuf::from("x.csv")));
                assert!(clear);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_db_flag_overrides_config() {
        let cli = Cli::try_parse_from(["jobwatch-cli", "migrate", "--db", "/tmp/other.sqlite3"]).unwrap();
        assert_eq!(cli.config().database_path, PathBuf::from("/tmp/other.sqlite3"));
    }

    #[test]
    fn no_subcommand_is_accepted() {
        let cli = Cli::try_parse_from(["jobwatch-cli"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn serve_port_must_be_numeric() {
        assert!(Cli::try_parse_from(["jobwatch-cli", "serve", "--port", "http"]).is_err());
    }
}
