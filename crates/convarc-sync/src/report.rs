use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use convarc_core::{Classification, TranscriptArtifact};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use crate::config::SyncMode;

pub const RUN_REPORT_FILE: &str = "run_report.json";
pub const SUMMARY_FILE: &str = "summary.md";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub conversation_id: String,
    pub error: String,
}

/// Everything one sync run did, accumulated by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub profile: String,
    pub mode: SyncMode,
    pub target_ai_transcripts: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    pub start_page: u32,
    pub next_page_cursor: u32,
    pub pages_fetched: u32,

    pub fetched: usize,
    pub malformed: usize,
    pub skipped_already_processed: usize,
    pub skipped_no_transcription: usize,
    pub skipped_too_short: usize,
    pub duplicates_in_batch: usize,
    pub eligible: usize,
    /// Eligible rows left for a later run by the scan ceiling.
    #[serde(default)]
    pub deferred_by_scan_ceiling: usize,

    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub ai_transcripts: usize,
    pub manual_notes: usize,
    pub inline_texts: usize,
    pub no_transcript: usize,

    pub mirrored: usize,
    pub mirror_failures: usize,
    pub mapping_rows: usize,

    pub stopped_at_target: bool,
    pub total_processed_all_time: usize,
    /// `false` when the final progress flush failed.
    pub progress_saved: bool,

    pub artifacts: Vec<TranscriptArtifact>,
    pub failures: Vec<RecordFailure>,
}

impl RunReport {
    pub fn new(
        profile: &str,
        mode: SyncMode,
        target_ai_transcripts: Option<usize>,
        start_page: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            profile: profile.to_string(),
            mode,
            target_ai_transcripts,
            started_at,
            finished_at: started_at,
            start_page,
            next_page_cursor: start_page,
            pages_fetched: 0,
            fetched: 0,
            malformed: 0,
            skipped_already_processed: 0,
            skipped_no_transcription: 0,
            skipped_too_short: 0,
            duplicates_in_batch: 0,
            eligible: 0,
            deferred_by_scan_ceiling: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            ai_transcripts: 0,
            manual_notes: 0,
            inline_texts: 0,
            no_transcript: 0,
            mirrored: 0,
            mirror_failures: 0,
            mapping_rows: 0,
            stopped_at_target: false,
            total_processed_all_time: 0,
            progress_saved: false,
            artifacts: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn record_artifact(&mut self, artifact: TranscriptArtifact) {
        match artifact.classification {
            Classification::AiTranscript => self.ai_transcripts += 1,
            Classification::ManualNote => self.manual_notes += 1,
            Classification::InlineText => self.inline_texts += 1,
            Classification::NoTranscript => self.no_transcript += 1,
        }
        self.succeeded += 1;
        self.artifacts.push(artifact);
    }

    pub fn record_failure(&mut self, conversation_id: &str, error: String) {
        self.failed += 1;
        self.failures.push(RecordFailure {
            conversation_id: conversation_id.to_string(),
            error,
        });
    }

    pub fn count(&self, classification: Classification) -> usize {
        match classification {
            Classification::AiTranscript => self.ai_transcripts,
            Classification::ManualNote => self.manual_notes,
            Classification::InlineText => self.inline_texts,
            Classification::NoTranscript => self.no_transcript,
        }
    }

    /// Operator-facing markdown summary.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Sync Run `{}`\n", self.run_id);
        let _ = writeln!(out, "- Profile: {} ({:?})", self.profile, self.mode);
        if let Some(target) = self.target_ai_transcripts {
            let _ = writeln!(out, "- Target AI transcripts: {target}");
        }
        let _ = writeln!(out, "- Started: {}", self.started_at.to_rfc3339());
        let _ = writeln!(out, "- Finished: {}", self.finished_at.to_rfc3339());
        let _ = writeln!(
            out,
            "- Pages: started at {}, fetched {}, next run starts at {}",
            self.start_page, self.pages_fetched, self.next_page_cursor
        );

        let _ = writeln!(out, "\n## Window\n");
        let _ = writeln!(out, "- Fetched: {}", self.fetched);
        let _ = writeln!(out, "- Malformed rows: {}", self.malformed);
        let _ = writeln!(out, "- Skipped (already processed): {}", self.skipped_already_processed);
        let _ = writeln!(out, "- Skipped (no AI transcription): {}", self.skipped_no_transcription);
        let _ = writeln!(out, "- Skipped (too short): {}", self.skipped_too_short);
        let _ = writeln!(out, "- Duplicates in batch: {}", self.duplicates_in_batch);
        let _ = writeln!(out, "- Eligible: {}", self.eligible);
        if self.deferred_by_scan_ceiling > 0 {
            let _ = writeln!(out, "- Deferred by scan ceiling: {}", self.deferred_by_scan_ceiling);
        }

        let _ = writeln!(out, "\n## Results\n");
        let _ = writeln!(out, "- Processed: {} ({} ok, {} failed)", self.processed, self.succeeded, self.failed);
        for classification in [
            Classification::AiTranscript,
            Classification::ManualNote,
            Classification::InlineText,
            Classification::NoTranscript,
        ] {
            let _ = writeln!(out, "- {classification}: {}", self.count(classification));
        }
        let _ = writeln!(out, "- Drive uploads: {} ok, {} failed", self.mirrored, self.mirror_failures);
        let _ = writeln!(out, "- CRM mapping rows: {}", self.mapping_rows);
        if self.stopped_at_target {
            let _ = writeln!(out, "- Stopped early: target reached");
        }
        let _ = writeln!(out, "- Processed all time: {}", self.total_processed_all_time);
        if !self.progress_saved {
            let _ = writeln!(out, "- WARNING: final progress save failed");
        }

        if !self.failures.is_empty() {
            let _ = writeln!(out, "\n## Failures\n");
            for failure in &self.failures {
                let _ = writeln!(out, "- `{}`: {}", failure.conversation_id, failure.error);
            }
        }
        out
    }
}

/// Writes `run_report.json` and `summary.md` under `<reports_root>/<run_id>/`.
pub async fn write_run_report(reports_root: &Path, report: &RunReport) -> Result<PathBuf> {
    let dir = reports_root.join(report.run_id.to_string());
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let json = serde_json::to_vec_pretty(report).context("serializing run report")?;
    fs::write(dir.join(RUN_REPORT_FILE), json)
        .await
        .with_context(|| format!("writing {RUN_REPORT_FILE}"))?;
    fs::write(dir.join(SUMMARY_FILE), report.render_summary())
        .await
        .with_context(|| format!("writing {SUMMARY_FILE}"))?;
    Ok(dir)
}

/// Past run reports, newest first. Directories without a readable report are
/// skipped.
pub fn read_run_reports(reports_root: &Path, limit: usize) -> Result<Vec<RunReport>> {
    if !reports_root.exists() {
        return Ok(Vec::new());
    }
    let mut reports = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let text = std::fs::read_to_string(entry.path().join(RUN_REPORT_FILE)).ok()?;
            serde_json::from_str::<RunReport>(&text).ok()
        })
        .collect::<Vec<_>>();
    reports.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    reports.truncate(limit.max(1));
    Ok(reports)
}
