//! Operator jobs that reset local progress or reshape the drive folder.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use convarc_storage::{LocalArchive, ProgressStore, ResetOutcome};
use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};

use crate::sink::{DriveMirror, TEXT_MIME};

/// Backs up and removes the progress files so the next sync starts over.
pub async fn clean(progress: &ProgressStore, backups_dir: &std::path::Path) -> Result<Option<ResetOutcome>> {
    let outcome = progress
        .reset(backups_dir, Utc::now())
        .await
        .context("resetting progress")?;
    match &outcome {
        Some(outcome) => info!(
            processed_ids = outcome.processed_ids,
            next_page_cursor = outcome.next_page_cursor,
            backups = outcome.backups.len(),
            "progress reset"
        ),
        None => info!("no progress files found; nothing to reset"),
    }
    Ok(outcome)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrivePruneReport {
    pub listed: usize,
    pub matched: usize,
    pub deleted: usize,
    pub failed: usize,
    pub dry_run: bool,
}

/// Deletes files created before `before`. Files without a creation time are
/// kept.
pub async fn drive_prune(
    mirror: &DriveMirror,
    before: DateTime<Utc>,
    dry_run: bool,
) -> Result<DrivePruneReport> {
    let files = mirror
        .target
        .list_folder(&mirror.folder_id)
        .await
        .context("listing drive folder")?;
    let doomed: Vec<_> = files
        .iter()
        .filter(|file| file.created_time.is_some_and(|created| created < before))
        .collect();

    let mut report = DrivePruneReport {
        listed: files.len(),
        matched: doomed.len(),
        dry_run,
        ..DrivePruneReport::default()
    };
    info!(listed = report.listed, matched = report.matched, %before, dry_run, "drive prune");
    if dry_run {
        return Ok(report);
    }

    for file in doomed {
        match mirror.target.delete_file(&file.id).await {
            Ok(()) => report.deleted += 1,
            Err(err) => {
                warn!(file = %file.name, error = %format!("{err:#}"), "delete failed");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriveResetReport {
    pub deleted: usize,
    pub delete_failures: usize,
    pub uploaded: usize,
    pub upload_failures: usize,
}

/// Empties the drive folder, then uploads every local transcript so the
/// folder mirrors the archive exactly.
pub async fn drive_reset(mirror: &DriveMirror, archive: &LocalArchive) -> Result<DriveResetReport> {
    let mut report = DriveResetReport::default();

    let existing = mirror
        .target
        .list_folder(&mirror.folder_id)
        .await
        .context("listing drive folder")?;
    for file in &existing {
        match mirror.target.delete_file(&file.id).await {
            Ok(()) => report.deleted += 1,
            Err(err) => {
                warn!(file = %file.name, error = %format!("{err:#}"), "delete failed");
                report.delete_failures += 1;
            }
        }
    }
    info!(deleted = report.deleted, failed = report.delete_failures, "drive folder emptied");

    let local = archive.list_transcripts().await?;
    for path in local {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        match mirror
            .target
            .create_file(&name, TEXT_MIME, &mirror.folder_id, bytes)
            .await
        {
            Ok(_) => report.uploaded += 1,
            Err(err) => {
                warn!(file = %name, error = %format!("{err:#}"), "upload failed");
                report.upload_failures += 1;
            }
        }
        if report.uploaded > 0 && report.uploaded % 10 == 0 {
            info!(uploaded = report.uploaded, "re-upload progress");
        }
    }
    info!(uploaded = report.uploaded, failed = report.upload_failures, "drive reset complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use convarc_core::ProgressState;
    use convarc_storage::{DriveFile, DriveTarget};

    use super::*;
    use crate::sink::testing::MemoryDrive;

    fn drive_with(files: Vec<DriveFile>) -> (Arc<MemoryDrive>, DriveMirror) {
        let drive = Arc::new(MemoryDrive::default());
        if let Ok(mut stored) = drive.files.lock() {
            for file in files {
                stored.insert(file.id.clone(), file);
            }
        }
        let mirror = DriveMirror {
            target: drive.clone(),
            folder_id: "folder".into(),
        };
        (drive, mirror)
    }

    fn file(id: &str, created: Option<DateTime<Utc>>) -> DriveFile {
        DriveFile {
            id: id.into(),
            name: format!("{id}.txt"),
            web_view_link: None,
            created_time: created,
        }
    }

    #[tokio::test]
    async fn clean_backs_up_and_removes_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProgressStore::new(dir.path().join("progress.json"), None);
        let state = ProgressState::from_parts(["a".to_string(), "b".to_string()], 4, None);
        store.save(&state, Some(4)).await.expect("save");

        let outcome = clean(&store, &dir.path().join("backups"))
            .await
            .expect("clean")
            .expect("something reset");
        assert_eq!(outcome.processed_ids, 2);
        assert_eq!(outcome.next_page_cursor, 4);
        assert!(outcome.backups[0].exists());
        assert!(!store.current_path().exists());
        assert!(clean(&store, &dir.path().join("backups")).await.expect("clean").is_none());
    }

    #[tokio::test]
    async fn prune_deletes_only_files_created_before_the_cutoff() {
        let cutoff = Utc.with_ymd_and_hms(2025, 11, 15, 0, 0, 0).single().expect("ts");
        let (drive, mirror) = drive_with(vec![
            file("old", Some(cutoff - chrono::Duration::days(1))),
            file("new", Some(cutoff + chrono::Duration::hours(1))),
            file("undated", None),
        ]);

        let dry = drive_prune(&mirror, cutoff, true).await.expect("dry run");
        assert_eq!((dry.listed, dry.matched, dry.deleted), (3, 1, 0));

        let real = drive_prune(&mirror, cutoff, false).await.expect("prune");
        assert_eq!(real.deleted, 1);
        let left: Vec<_> = drive
            .list_folder("folder")
            .await
            .expect("list")
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(left, vec!["new".to_string(), "undated".to_string()]);
    }

    #[tokio::test]
    async fn reset_replaces_drive_contents_with_local_transcripts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = LocalArchive::new(dir.path());
        archive.write("a.txt", "one").await.expect("write");
        archive.write("b.txt", "two").await.expect("write");
        let (drive, mirror) = drive_with(vec![file("stale", None)]);

        let report = drive_reset(&mirror, &archive).await.expect("reset");
        assert_eq!(report.deleted, 1);
        assert_eq!(report.uploaded, 2);
        let mut names: Vec<_> = drive
            .list_folder("folder")
            .await
            .expect("list")
            .into_iter()
            .map(|f| f.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }
}
