use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logpulse::config::Config;
use logpulse::discovery::suggest_default_log_path;
use logpulse::models::LogRecord;
use logpulse::storage::{LogStore, PurgeReport, SchemaAction, SqliteStore};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "logpulse-admin")]
#[command(about = "logpulse maintenance CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest newline-delimited JSON log records for a site
    Ingest {
        /// Site id
        site: String,
        /// NDJSON file, or "-" for stdin
        #[arg(default_value = "-")]
        input: PathBuf,
        /// Records per transaction (defaults to INGEST_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Delete raw events older than the retention horizon and repair aggregates
    Purge {
        /// Retention in days (defaults to LOG_RETENTION_DAYS)
        #[arg(long)]
        days: Option<i64>,
    },
    /// Delete all data of one site
    Clear {
        site: String,
    },
    /// Delete all data of every site
    ClearAll,
    /// Recompute every derived table of a site from its raw events
    Rebuild {
        site: String,
    },
    /// Create, migrate or upgrade site tables (defaults to LOGPULSE_SITES)
    Migrate {
        sites: Vec<String>,
    },
    /// List sites present in the database
    Sites,
    /// Print every derived table of a site as JSON
    Snapshot {
        site: String,
    },
    /// Guess the access log glob from the container mounts
    SuggestLogPath,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    // Needs no database
    if let Commands::SuggestLogPath = cli.command {
        match suggest_default_log_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("⚠ No mounted directory with .log or .gz files found"),
        }
        return Ok(());
    }

    let config = Config::from_env()?;
    let store = SqliteStore::new(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("opening {}", config.database.url))?;

    match cli.command {
        Commands::Ingest {
            site,
            input,
            batch_size,
        } => {
            store.ensure_site_schema(&site).await?;
            let batch_size = batch_size.unwrap_or(config.ingest.batch_size).max(1);
            let total = if input.as_os_str() == "-" {
                ingest_stream(&store, &site, tokio::io::stdin(), batch_size).await?
            } else {
                let file = tokio::fs::File::open(&input)
                    .await
                    .with_context(|| format!("opening {}", input.display()))?;
                ingest_stream(&store, &site, file, batch_size).await?
            };
            println!("✓ Ingested {} records into '{}'", total, site);
        }
        Commands::Purge { days } => {
            let report = store.purge(days.unwrap_or(config.retention.days)).await?;
            print_purge_report(&report);
        }
        Commands::Clear { site } => {
            store.clear_site(&site).await?;
            println!("✓ Cleared all data of '{}'", site);
        }
        Commands::ClearAll => {
            let sites = store.sites().await?;
            store.clear_all().await?;
            println!("✓ Cleared all data of {} site(s)", sites.len());
        }
        Commands::Rebuild { site } => {
            store.rebuild_site(&site).await?;
            println!("✓ Rebuilt derived tables of '{}'", site);
        }
        Commands::Migrate { sites } => {
            let sites = if sites.is_empty() { config.sites.clone() } else { sites };
            if sites.is_empty() {
                println!("No sites given and LOGPULSE_SITES is empty.");
            }
            for site in sites {
                match store.ensure_site_schema(&site).await? {
                    SchemaAction::Created => println!("✓ '{}': created tables", site),
                    SchemaAction::Migrated { rows } => {
                        println!("✓ '{}': migrated {} legacy rows", site, rows)
                    }
                    SchemaAction::Upgraded { backfilled } if backfilled.is_empty() => {
                        println!("✓ '{}': up to date", site)
                    }
                    SchemaAction::Upgraded { backfilled } => {
                        let sets: Vec<String> = backfilled.iter().map(ToString::to_string).collect();
                        println!("✓ '{}': backfilled {}", site, sets.join(", "));
                    }
                }
            }
        }
        Commands::Sites => {
            let sites = store.sites().await?;
            if sites.is_empty() {
                println!("No sites found.");
            }
            for site in sites {
                println!("{}", site);
            }
        }
        Commands::Snapshot { site } => {
            let snapshot = store.snapshot(&site).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::SuggestLogPath => {}
    }

    Ok(())
}

async fn ingest_stream<R>(store: &SqliteStore, site: &str, reader: R, batch_size: usize) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut batch: Vec<LogRecord> = Vec::with_capacity(batch_size);
    let mut total = 0;
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let record: LogRecord =
            serde_json::from_str(&line).with_context(|| format!("line {line_no}: invalid record"))?;
        batch.push(record);

        if batch.len() >= batch_size {
            store
                .ingest(site, &batch)
                .await
                .with_context(|| format!("batch ending at line {line_no}"))?;
            total += batch.len();
            batch.clear();
        }
    }

    store.ingest(site, &batch).await.context("final batch")?;
    total += batch.len();
    Ok(total)
}

fn print_purge_report(report: &PurgeReport) {
    println!(
        "✓ Deleted {} raw rows older than {} across {} site(s)",
        report.rows_deleted,
        report.cutoff,
        report.sites.len()
    );
    for site in &report.sites {
        println!("  {:<32} {:>10} rows", site.site, site.rows_deleted);
    }
    for (site, failure) in report.failures() {
        println!("⚠ '{}': {} step failed: {}", site, failure.step, failure.error);
    }
}
