use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_core::replay::{ReplayDetector, ReplayEmbedder, ReplaySource};
use rollcall_core::{AttendanceEngine, AttendanceReport, CancelFlag, Embedding};
use rollcall_store::{AttendanceStore, StoredAttendance};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Class attendance from recorded video")]
struct Cli {
    /// TOML config file (default: $ROLLCALL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Database path override
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity, replacing any existing embedding for the same id
    Enroll {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// JSON file: an array of floats, or {"values": [...], "model_version": "..."}
        #[arg(long)]
        embedding: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        /// Identity ID to remove
        id: String,
    },
    /// Process a class recording and record attendance
    Process {
        /// Detection recording (JSON) produced by the face pipeline
        #[arg(long)]
        recording: PathBuf,
        #[arg(long = "class")]
        class_id: String,
        /// Frames inspected per second of video
        #[arg(long)]
        rate: Option<f64>,
        /// Cosine similarity a match must exceed
        #[arg(long)]
        threshold: Option<f32>,
        /// Minimum attendance percentage (50-100)
        #[arg(long)]
        min_attendance: Option<f64>,
        /// Date to record attendance under (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Print the report without saving it
        #[arg(long)]
        dry_run: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show saved attendance for a class
    Report {
        #[arg(long = "class")]
        class_id: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingFile {
    Bare(Vec<f32>),
    Full(Embedding),
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Commands::Enroll {
            id,
            name,
            embedding,
        } => enroll(&config, &id, &name, &embedding),
        Commands::List => list(&config),
        Commands::Remove { id } => {
            let store = open_store(&config)?;
            if !store.remove_identity(&id)? {
                bail!("no identity with id {id}");
            }
            println!("Removed {id}");
            Ok(())
        }
        Commands::Process {
            recording,
            class_id,
            rate,
            threshold,
            min_attendance,
            date,
            dry_run,
            json,
        } => {
            if let Some(rate) = rate {
                config.target_sample_rate_hz = rate;
            }
            if let Some(threshold) = threshold {
                config.similarity_threshold = threshold;
            }
            if let Some(pct) = min_attendance {
                config.min_attendance_percent = pct;
            }
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            process(&config, recording, class_id, date, dry_run, json).await
        }
        Commands::Report {
            class_id,
            date,
            json,
        } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let store = open_store(&config)?;
            let rows = store.attendance_for(&class_id, date)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stored_rows_json(&rows))?);
            } else if rows.is_empty() {
                println!("No attendance recorded for {class_id} on {date}");
            } else {
                print_stored(&rows);
            }
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> Result<AttendanceStore> {
    AttendanceStore::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))
}

fn enroll(config: &Config, id: &str, name: &str, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading embedding {}", path.display()))?;
    let embedding = match serde_json::from_str(&text)
        .with_context(|| format!("parsing embedding {}", path.display()))?
    {
        EmbeddingFile::Bare(values) => Embedding::new(values),
        EmbeddingFile::Full(embedding) => embedding,
    };

    // Validate against the configured width before touching storage.
    let mut registry = rollcall_core::IdentityRegistry::new(config.embedding_dimension)?;
    registry.enroll(id, name, embedding.clone())?;

    let store = open_store(config)?;
    store.enroll_identity(id, name, &embedding)?;
    println!("Enrolled {name} ({id})");
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let identities = store.load_all_identities()?;
    if identities.is_empty() {
        println!("No identities enrolled");
        return Ok(());
    }
    println!("{:<16} {:<24} {:>5}  MODEL", "ID", "NAME", "DIM");
    for identity in identities {
        println!(
            "{:<16} {:<24} {:>5}  {}",
            identity.identity_id,
            identity.display_name,
            identity.embedding.dimension(),
            identity.embedding.model_version.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn process(
    config: &Config,
    recording: PathBuf,
    class_id: String,
    date: NaiveDate,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let policy = config.policy();
    let mut store = open_store(config)?;
    let registry = store
        .load_registry(config.embedding_dimension)
        .context("loading enrolled identities")?;
    if registry.is_empty() {
        tracing::warn!("no identities enrolled; every report row will be empty");
    }

    let cancel = CancelFlag::new();
    let run_cancel = cancel.clone();
    let mut task = tokio::task::spawn_blocking(move || {
        let mut engine = AttendanceEngine::new(ReplayDetector, ReplayEmbedder, policy)?;
        engine.run(&class_id, ReplaySource::open(recording), &registry, &run_cancel)
    });

    let outcome = tokio::select! {
        joined = &mut task => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupt received; cancelling run");
            cancel.cancel();
            task.await
        }
    };
    let report = outcome.context("engine task panicked")??;

    if dry_run {
        tracing::info!("dry run; attendance not saved");
    } else {
        store.save_report(&report, date)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, date);
    }
    Ok(())
}

fn minutes(seconds: f64) -> f64 {
    (seconds / 60.0 * 10.0).round() / 10.0
}

fn print_report(report: &AttendanceReport, date: NaiveDate) {
    println!(
        "Class {} on {date}: {} of {} sampled frames processed ({} skipped), {} needed for Present",
        report.class_id,
        report.frames_processed,
        report.frames_sampled,
        report.frames_skipped,
        report.required_count,
    );
    println!(
        "{:<16} {:<24} {:>8} {:>14}  STATUS",
        "STUDENT ID", "NAME", "MATCHES", "DURATION (MIN)"
    );
    for r in &report.records {
        println!(
            "{:<16} {:<24} {:>8} {:>14.1}  {}",
            r.identity_id,
            r.display_name,
            r.match_count,
            minutes(r.estimated_duration_seconds),
            r.status,
        );
    }
}

fn print_stored(rows: &[StoredAttendance]) {
    println!(
        "{:<16} {:<24} {:>14}  STATUS",
        "STUDENT ID", "NAME", "DURATION (MIN)"
    );
    for r in rows {
        println!(
            "{:<16} {:<24} {:>14.1}  {}",
            r.identity_id,
            r.name.as_deref().unwrap_or("(removed)"),
            minutes(r.duration_seconds),
            r.status,
        );
    }
}

fn stored_rows_json(rows: &[StoredAttendance]) -> serde_json::Value {
    rows.iter()
        .map(|r| {
            serde_json::json!({
                "class_id": r.class_id,
                "identity_id": r.identity_id,
                "name": r.name,
                "date": r.date.to_string(),
                "duration_seconds": r.duration_seconds,
                "status": r.status,
            })
        })
        .collect()
}
