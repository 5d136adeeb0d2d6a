//! Incremental conversation sync: configuration, the transcript fallback
//! chain, the sync driver and the operator jobs around it.

mod analyze;
mod config;
mod crm_import;
mod driver;
mod history;
mod maintenance;
mod pipeline;
mod render;
mod report;
mod resolve;
mod scheduler;
mod sink;
mod verify;

pub use analyze::{analyze_first_page, AnalysisReport, Breakdown};
pub use config::{
    ProfileError, ProfileSet, RunProfile, SyncConfig, SyncMode, DEFAULT_SYNC_CRON,
};
pub use crm_import::{
    build_import, crm_id_key, join_rows, CrmContact, CrmDirectory, GenerationMetadata,
    ImportOutcome, ImportPaths, ImportRow,
};
pub use driver::{filter_window, SkipReason, SyncDriver, CHECKPOINT_EVERY};
pub use history::{load_history, ArchivedImport, History};
pub use maintenance::{clean, drive_prune, drive_reset, DrivePruneReport, DriveResetReport};
pub use pipeline::{SyncPipeline, WeeklyOutcome, WEEKLY_PROFILE};
pub use render::{artifact_body, artifact_file_name, header_value, media_slug, render_artifact};
pub use report::{read_run_reports, write_run_report, RecordFailure, RunReport};
pub use resolve::{Resolution, ResolutionStep, StepOutcome, TranscriptResolver};
pub use scheduler::build_scheduler;
pub use sink::{ArchiveSink, ArchiveWriter, DriveMirror, MirrorOutcome, SinkReceipt, TEXT_MIME};
pub use verify::{verify_archive, DuplicateGroup, VerifyReport};

