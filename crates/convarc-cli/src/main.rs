use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use convarc_core::Classification;
use convarc_sync::{build_scheduler, SyncConfig, SyncPipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "convarc")]
#[command(about = "Archive conversation transcripts locally and to Google Drive")]
struct Cli {
    /// Log level for the convarc crates when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Serve API responses from a captured fixture bundle instead of the
    /// live API. The drive mirror is disabled in this mode.
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync pass with a named profile.
    Sync {
        #[arg(long, default_value = "test")]
        profile: String,
    },
    /// List the available run profiles.
    Profiles,
    /// Reset progress, keeping backups of the old files.
    Clean,
    /// Check the local archive for duplicates and unreadable files.
    Verify,
    /// Break down the first page of conversations by media type and platform.
    Analyze,
    /// Join the mapping log with the CRM export into the import CSV.
    ImportCsv,
    /// Show the latest import and recent sync runs.
    History {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
    /// Delete drive files created before a date (YYYY-MM-DD or RFC 3339).
    DrivePrune {
        #[arg(long)]
        before: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Empty the drive folder and re-upload the local archive.
    DriveReset,
    /// Run the weekly pipeline on the configured cron until interrupted.
    Schedule,
}

const LOGGED_CRATES: [&str; 5] = [
    "convarc_cli",
    "convarc_core",
    "convarc_storage",
    "convarc_adapters",
    "convarc_sync",
];

fn default_filter(level: &str) -> String {
    let scoped: Vec<String> = LOGGED_CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect();
    format!("warn,{}", scoped.join(","))
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level))),
        )
        .with_target(false)
        .init();
}

fn parse_before(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid --before value {value:?}"))?;
    match day.and_hms_opt(0, 0, 0) {
        Some(midnight) => Ok(midnight.and_utc()),
        None => bail!("invalid --before value {value:?}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let pipeline = SyncPipeline::from_config(SyncConfig::from_env(), cli.fixture.as_deref())?;

    match cli.command.unwrap_or(Commands::Sync {
        profile: "test".to_string(),
    }) {
        Commands::Sync { profile } => {
            let report = pipeline.run_sync(&profile).await?;
            println!(
                "sync complete: run_id={} processed={} ai={} notes={} inline={} none={} failed={} next_page={}",
                report.run_id,
                report.processed,
                report.ai_transcripts,
                report.manual_notes,
                report.inline_texts,
                report.no_transcript,
                report.failed,
                report.next_page_cursor
            );
            for artifact in report
                .artifacts
                .iter()
                .filter(|a| a.classification != Classification::AiTranscript)
            {
                println!("  {} {}", artifact.classification, artifact.file_name);
            }
        }
        Commands::Profiles => {
            for name in pipeline.profiles().names() {
                let profile = pipeline.profiles().get(name)?;
                println!("{name}: {}", serde_json::to_string(&profile)?);
            }
        }
        Commands::Clean => match pipeline.clean().await? {
            Some(outcome) => {
                println!(
                    "progress reset: {} processed ids and page {} backed up",
                    outcome.processed_ids, outcome.next_page_cursor
                );
                for backup in &outcome.backups {
                    println!("  backup: {}", backup.display());
                }
            }
            None => println!("no progress files to reset"),
        },
        Commands::Verify => {
            let report = pipeline.verify().await?;
            print!("{}", report.render());
            if !report.is_clean() {
                bail!("archive has duplicates or unreadable files");
            }
        }
        Commands::Analyze => print!("{}", pipeline.analyze().await?.render()),
        Commands::ImportCsv => {
            let outcome = pipeline.import_csv().await?;
            let meta = &outcome.metadata;
            println!(
                "import written: {} records ({} contacts, {} accounts, {} drive links)",
                meta.total_records, meta.contact_matches, meta.account_matches, meta.drive_urls
            );
            println!("  output: {}", outcome.output.display());
            println!("  archive: {}", outcome.archive_copy.display());
        }
        Commands::History { runs } => print!("{}", pipeline.history(runs)?.render()),
        Commands::DrivePrune { before, dry_run } => {
            let report = pipeline.drive_prune(parse_before(&before)?, dry_run).await?;
            println!(
                "drive prune{}: listed={} matched={} deleted={} failed={}",
                if report.dry_run { " (dry run)" } else { "" },
                report.listed,
                report.matched,
                report.deleted,
                report.failed
            );
        }
        Commands::DriveReset => {
            let report = pipeline.drive_reset().await?;
            println!(
                "drive reset: deleted={} delete_failures={} uploaded={} upload_failures={}",
                report.deleted, report.delete_failures, report.uploaded, report.upload_failures
            );
        }
        Commands::Schedule => {
            let cron = pipeline.config().sync_cron.clone();
            let mut scheduler = build_scheduler(Arc::new(pipeline), &cron).await?;
            scheduler.start().await.context("starting scheduler")?;
            info!(cron = %cron, "scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            scheduler.shutdown().await.context("stopping scheduler")?;
            info!("scheduler stopped");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn before_accepts_dates_and_timestamps() {
        assert_eq!(
            parse_before("2025-11-01").expect("date").to_rfc3339(),
            "2025-11-01T00:00:00+00:00"
        );
        assert_eq!(
            parse_before("2025-11-01T12:30:00+02:00").expect("rfc3339").to_rfc3339(),
            "2025-11-01T10:30:00+00:00"
        );
        assert!(parse_before("last tuesday").is_err());
    }

    #[test]
    fn log_level_applies_to_workspace_crates_only() {
        let filter = default_filter("debug");
        assert!(filter.starts_with("warn,"));
        assert!(filter.contains("convarc_sync=debug"));
        assert!(filter.contains("convarc_storage=debug"));
    }
}
