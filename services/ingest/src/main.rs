//! Ingest CLI - uploads, reprocesses and deletes spreadsheets
//!
//! Usage:
//!   cargo run --bin ingest -- upload --path ./indicadores.xlsx --owner <uuid>
//!   cargo run --bin ingest -- upload --path ./indicadores.xlsx --owner <uuid> --dry-run
//!   cargo run --bin ingest -- upload --path ./a.xlsx --path ./b.xls --owner <uuid> --description "2023"
//!   cargo run --bin ingest -- reprocess --file-id <uuid>
//!   cargo run --bin ingest -- delete --file-id <uuid> --owner <uuid>

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ingest::{inspect, BatchOutcome, BlobStorage, Config, IngestOutcome, Ingestor, Upload};
use records::PgStore;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "ingest", about = "Loads spreadsheets into the record store")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate, store and process one or more spreadsheets
    Upload {
        /// Path to a .xlsx/.xls file; repeat for a batch upload
        #[arg(long = "path", required = true)]
        paths: Vec<PathBuf>,

        /// Owning user id (UUID)
        #[arg(long)]
        owner: Uuid,

        /// Display name (single file only; defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// Description shared by every uploaded file
        #[arg(long)]
        description: Option<String>,

        /// Validate and parse only - don't touch the database
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },
    /// Rebuild metadata and records from the stored bytes
    Reprocess {
        #[arg(long)]
        file_id: Uuid,
    },
    /// Delete a file, its records and its stored bytes
    Delete {
        #[arg(long)]
        file_id: Uuid,

        /// Requesting user; must own the file
        #[arg(long)]
        owner: Uuid,
    },
}

async fn connect(config: &Config) -> Result<Ingestor> {
    let store = PgStore::connect(config.db_url()?, 5)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to run migrations")?;

    Ok(Ingestor::new(
        Arc::new(store),
        BlobStorage::new(&config.storage_dir),
        config.limits.clone(),
        config.synonyms.clone(),
    ))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_batch(outcome: &BatchOutcome) {
    for created in &outcome.created {
        println!("OK     {} ({} records) {}", created.file.name, created.records, created.file.file_id);
    }
    for failure in &outcome.errors {
        println!("FAILED {}: {}", failure.name, failure.error);
    }
    println!(
        "Processed: {}  Succeeded: {}  Failed: {}",
        outcome.total, outcome.succeeded, outcome.failed
    );
}

fn print_outcome(outcome: &IngestOutcome) {
    let file = &outcome.file;
    println!("File ID:    {}", file.file_id);
    println!("Name:       {}", file.name);
    println!("Hash:       {}", file.content_hash);
    println!("Stored at:  {}", file.storage_path);
    println!("Rows:       {}", file.row_count);
    println!("Columns:    {} {:?}", file.column_count, file.columns);
    println!("Year:       {}", file.year.map(|y| y.to_string()).unwrap_or_else(|| "-".to_string()));
    println!("Department: {}", file.department.as_deref().unwrap_or("-"));
    println!("Records:    {}", outcome.records);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingest=info,records=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    match args.command {
        Command::Upload {
            paths,
            owner,
            name,
            description,
            dry_run,
        } => {
            if name.is_some() && paths.len() > 1 {
                bail!("--name can only be used with a single --path");
            }

            let mut uploads = Vec::with_capacity(paths.len());
            for path in &paths {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let name = name.clone().unwrap_or_else(|| display_name(path));
                info!(name = %name, bytes = bytes.len(), dry_run, "uploading");
                uploads.push(Upload {
                    name,
                    description: description.clone(),
                    owner_id: owner,
                    bytes,
                });
            }

            if dry_run {
                println!("Dry run - nothing saved");
                for upload in &uploads {
                    let (_, metadata) =
                        inspect(&upload.bytes, &upload.name, &config.limits, &config.synonyms)
                            .with_context(|| format!("{} failed", upload.name))?;
                    println!("{}:", upload.name);
                    println!("{}", serde_json::to_string_pretty(&metadata)?);
                }
                return Ok(());
            }

            let ingestor = connect(&config).await?;
            if uploads.len() == 1 {
                let upload = uploads.remove(0);
                let outcome = ingestor.ingest_upload(upload).await?;
                print_outcome(&outcome);
            } else {
                let outcome = ingestor.ingest_batch(uploads).await;
                print_batch(&outcome);
                if outcome.failed > 0 {
                    bail!("{} of {} files failed", outcome.failed, outcome.total);
                }
            }
        }
        Command::Reprocess { file_id } => {
            let ingestor = connect(&config).await?;
            let outcome = ingestor.reprocess(file_id).await?;
            print_outcome(&outcome);
        }
        Command::Delete { file_id, owner } => {
            let ingestor = connect(&config).await?;
            ingestor.delete_file(file_id, owner).await?;
            println!("Deleted {}", file_id);
        }
    }

    Ok(())
}
