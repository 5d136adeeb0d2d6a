//! One bounded, restartable sync run: fetch a window at the stored cursor,
//! filter it, resolve and archive each eligible record, checkpoint progress.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use convarc_adapters::{crm_id_of, ConversationApi, PagedRecord, RemoteSource};
use convarc_core::{
    ConversationRecord, CrmLinkage, CrmMappingRow, ProgressState, TranscriptArtifact,
    TranscriptionRef,
};
use convarc_storage::{LocalArchive, MappingLog, ProgressStore};
use tracing::{info, info_span, warn, Instrument};

use crate::config::{RunProfile, SyncConfig};
use crate::render::{artifact_file_name, render_artifact};
use crate::report::RunReport;
use crate::resolve::TranscriptResolver;
use crate::sink::{ArchiveSink, DriveMirror, MirrorOutcome};

pub const CHECKPOINT_EVERY: usize = 10;

/// Why a fetched record did not reach resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyProcessed,
    NoTranscription,
    TooShort,
    DuplicateInBatch,
}

/// Applies the eligibility rules in order. A missing or zero duration counts
/// as unknown and passes the length check.
pub fn filter_window(
    records: Vec<PagedRecord>,
    state: &ProgressState,
    min_duration_secs: f64,
) -> (Vec<PagedRecord>, Vec<(PagedRecord, SkipReason)>) {
    let mut seen = HashSet::new();
    let mut eligible = Vec::new();
    let mut skipped = Vec::new();

    for paged in records {
        let record = &paged.record;
        let reason = if state.contains(record.id.as_str()) {
            Some(SkipReason::AlreadyProcessed)
        } else if record.transcription == TranscriptionRef::Absent {
            Some(SkipReason::NoTranscription)
        } else if record
            .duration_secs
            .is_some_and(|secs| secs > 0.0 && secs < min_duration_secs)
        {
            Some(SkipReason::TooShort)
        } else if !seen.insert(record.id.clone()) {
            Some(SkipReason::DuplicateInBatch)
        } else {
            None
        };

        match reason {
            Some(reason) => skipped.push((paged, reason)),
            None => eligible.push(paged),
        }
    }
    (eligible, skipped)
}

struct ProcessedRecord {
    artifact: TranscriptArtifact,
    mirror: MirrorOutcome,
    mapped: bool,
}

pub struct SyncDriver {
    source: RemoteSource,
    resolver: TranscriptResolver,
    sink: ArchiveSink,
    progress: ProgressStore,
    mapping: MappingLog,
    checkpoint_every: usize,
}

impl SyncDriver {
    pub fn new(
        source: RemoteSource,
        sink: ArchiveSink,
        progress: ProgressStore,
        mapping: MappingLog,
    ) -> Self {
        Self {
            resolver: TranscriptResolver::new(source.clone()),
            source,
            sink,
            progress,
            mapping,
            checkpoint_every: CHECKPOINT_EVERY,
        }
    }

    /// Wires the driver to the configured local paths and, when a folder and
    /// credentials are present, the drive mirror.
    pub fn from_config(
        config: &SyncConfig,
        api: Arc<dyn ConversationApi>,
        mirror: Option<DriveMirror>,
    ) -> Self {
        let sink = ArchiveSink::new(Arc::new(LocalArchive::new(&config.download_dir)))
            .with_mirror(mirror);
        let progress = ProgressStore::new(
            config.progress_path(),
            Some(config.legacy_progress_path()),
        );
        Self::new(
            RemoteSource::new(api),
            sink,
            progress,
            MappingLog::new(config.mapping_path()),
        )
    }

    pub fn with_checkpoint_every(mut self, every: usize) -> Self {
        self.checkpoint_every = every.max(1);
        self
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Runs one sync pass. Only a failed listing aborts the run; every
    /// per-record problem is counted in the report instead.
    pub async fn run(&self, profile_name: &str, profile: &RunProfile) -> Result<RunReport> {
        let mut state = self.progress.load().await;
        let start_page = state.next_page_cursor();
        let mut report = RunReport::new(
            profile_name,
            profile.mode,
            profile.stop_target(),
            start_page,
            Utc::now(),
        );
        info!(
            run_id = %report.run_id,
            profile = profile_name,
            start_page,
            already_processed = state.processed_count(),
            "starting sync run"
        );

        let window = self
            .source
            .list_conversations(profile.max_records_to_scan, start_page)
            .await
            .with_context(|| format!("listing conversations from page {start_page}"))?;
        report.fetched = window.records.len();
        report.malformed = window.malformed;
        report.pages_fetched = window.pages_fetched;

        let (mut eligible, skipped) =
            filter_window(window.records, &state, profile.min_duration_secs);
        for (_, reason) in &skipped {
            match reason {
                SkipReason::AlreadyProcessed => report.skipped_already_processed += 1,
                SkipReason::NoTranscription => report.skipped_no_transcription += 1,
                SkipReason::TooShort => report.skipped_too_short += 1,
                SkipReason::DuplicateInBatch => report.duplicates_in_batch += 1,
            }
        }
        report.eligible = eligible.len();

        // Whole pages come back, so the ceiling is applied here. Rows past it
        // stay unprocessed and the cursor holds at the page of the first one.
        let deferred = if eligible.len() > profile.max_records_to_scan {
            eligible.split_off(profile.max_records_to_scan)
        } else {
            Vec::new()
        };
        report.deferred_by_scan_ceiling = deferred.len();
        let window_end = deferred
            .first()
            .map(|first| first.page)
            .unwrap_or(window.next_page);
        info!(
            fetched = report.fetched,
            eligible = report.eligible,
            deferred = report.deferred_by_scan_ceiling,
            skipped = skipped.len(),
            "window filtered"
        );

        let target = profile.stop_target();
        let delay = profile.api_delay();
        let mut resume_page = None;

        for (index, paged) in eligible.iter().enumerate() {
            if target.is_some_and(|target| report.ai_transcripts >= target) {
                info!(ai_transcripts = report.ai_transcripts, "target reached; stopping");
                resume_page = Some(paged.page);
                break;
            }
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let id = paged.record.id.as_str();
            let span = info_span!("sync_record", conversation_id = %id, page = paged.page);
            match self.process_record(&paged.record).instrument(span).await {
                Ok(processed) => {
                    match &processed.mirror {
                        MirrorOutcome::Uploaded(_) => report.mirrored += 1,
                        MirrorOutcome::Failed(_) => report.mirror_failures += 1,
                        MirrorOutcome::Disabled => {}
                    }
                    if processed.mapped {
                        report.mapping_rows += 1;
                    }
                    report.record_artifact(processed.artifact);
                }
                Err(err) => {
                    warn!(conversation_id = %id, error = %format!("{err:#}"), "record failed; marking processed");
                    report.record_failure(id, format!("{err:#}"));
                }
            }

            state.mark_processed(id);
            report.processed += 1;

            if report.processed % self.checkpoint_every == 0 {
                let cursor = eligible
                    .get(index + 1)
                    .map(|next| next.page)
                    .unwrap_or(window_end);
                if let Some(saved) = self.progress.checkpoint(&state, Some(cursor)).await {
                    info!(processed = report.processed, cursor = saved, "checkpoint saved");
                }
            }
        }
        report.stopped_at_target = target.is_some_and(|target| report.ai_transcripts >= target);

        let final_cursor = resume_page.unwrap_or(window_end);
        state.touch(Utc::now());
        match self.progress.checkpoint(&state, Some(final_cursor)).await {
            Some(saved) => {
                report.next_page_cursor = saved;
                report.progress_saved = true;
            }
            None => {
                report.next_page_cursor = final_cursor.max(start_page);
                report.progress_saved = false;
            }
        }
        report.total_processed_all_time = state.processed_count();
        report.finished_at = Utc::now();

        info!(
            run_id = %report.run_id,
            processed = report.processed,
            ai_transcripts = report.ai_transcripts,
            manual_notes = report.manual_notes,
            no_transcript = report.no_transcript,
            failed = report.failed,
            next_page_cursor = report.next_page_cursor,
            "sync run finished"
        );
        Ok(report)
    }

    async fn process_record(&self, record: &ConversationRecord) -> Result<ProcessedRecord> {
        let resolution = self.resolver.resolve(record, None).await;
        let linkage = self.crm_linkage(record).await;

        let file_name = artifact_file_name(record, Utc::now());
        let content = render_artifact(record, linkage.as_ref(), &resolution);
        let receipt = self.sink.write(&file_name, &content).await?;

        let mapped = match &linkage {
            Some(linkage) => {
                let row = CrmMappingRow::new(linkage, record, &file_name);
                match self.mapping.append(&row).await {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(error = %format!("{err:#}"), "could not append CRM mapping row");
                        false
                    }
                }
            }
            None => false,
        };

        info!(
            classification = %resolution.transcript.classification,
            step = ?resolution.step,
            file_name = %file_name,
            "saved transcript"
        );
        Ok(ProcessedRecord {
            artifact: TranscriptArtifact {
                file_name,
                local_path: receipt.local_path,
                classification: resolution.transcript.classification,
                remote_link: receipt.mirror.link().map(str::to_string),
            },
            mirror: receipt.mirror,
            mapped,
        })
    }

    /// Person and account CRM ids; lookups that fail leave the id unknown.
    async fn crm_linkage(&self, record: &ConversationRecord) -> Option<CrmLinkage> {
        if !record.has_crm_refs() {
            return None;
        }
        let person_crm_id = match &record.person_id {
            Some(id) => self
                .source
                .fetch_person_details(id.as_str())
                .await
                .as_ref()
                .and_then(crm_id_of),
            None => None,
        };
        let account_crm_id = match &record.account_id {
            Some(id) => self
                .source
                .fetch_account_details(id.as_str())
                .await
                .as_ref()
                .and_then(crm_id_of),
            None => None,
        };
        Some(CrmLinkage {
            conversation_id: record.id.clone(),
            person_id: record.person_id.clone(),
            person_crm_id,
            account_id: record.account_id.clone(),
            account_crm_id,
        })
    }
}
