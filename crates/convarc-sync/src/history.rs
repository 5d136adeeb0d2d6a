use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::crm_import::{GenerationMetadata, ARCHIVE_PREFIX};
use crate::report::{read_run_reports, RunReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivedImport {
    pub file_name: String,
    pub bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct History {
    pub latest: Option<GenerationMetadata>,
    pub archived: Vec<ArchivedImport>,
    pub runs: Vec<RunReport>,
}

/// Latest import metadata, archived import CSVs (newest first) and the most
/// recent `max_runs` sync reports.
pub fn load_history(
    metadata_path: &Path,
    archive_dir: &Path,
    reports_dir: &Path,
    max_runs: usize,
) -> Result<History> {
    let latest = if metadata_path.exists() {
        let text = std::fs::read_to_string(metadata_path)
            .with_context(|| format!("reading {}", metadata_path.display()))?;
        Some(
            serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", metadata_path.display()))?,
        )
    } else {
        None
    };

    let mut archived = Vec::new();
    if archive_dir.exists() {
        for entry in std::fs::read_dir(archive_dir)
            .with_context(|| format!("reading {}", archive_dir.display()))?
        {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !(file_name.starts_with(ARCHIVE_PREFIX) && file_name.ends_with(".csv")) {
                continue;
            }
            let meta = entry.metadata()?;
            archived.push(ArchivedImport {
                file_name,
                bytes: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
    }
    // Archive names embed a sortable timestamp.
    archived.sort_by(|a, b| b.file_name.cmp(&a.file_name));

    Ok(History {
        latest,
        archived,
        runs: read_run_reports(reports_dir, max_runs)?,
    })
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

impl History {
    pub fn render(&self) -> String {
        let mut out = String::new();
        match &self.latest {
            Some(meta) => {
                let total = meta.total_records;
                let _ = writeln!(out, "Latest import: {}", meta.generated_at.to_rfc3339());
                let _ = writeln!(out, "  Records: {total}");
                let _ = writeln!(
                    out,
                    "  Contact matches: {} ({:.1}%)",
                    meta.contact_matches,
                    percent(meta.contact_matches, total)
                );
                let _ = writeln!(
                    out,
                    "  Account matches: {} ({:.1}%)",
                    meta.account_matches,
                    percent(meta.account_matches, total)
                );
                let _ = writeln!(
                    out,
                    "  Drive links: {} ({:.1}%)",
                    meta.drive_urls,
                    percent(meta.drive_urls, total)
                );
            }
            None => {
                let _ = writeln!(out, "No import has been generated yet.");
            }
        }

        let _ = writeln!(out, "\nArchived imports: {}", self.archived.len());
        for file in &self.archived {
            let _ = writeln!(out, "  {} ({:.1} KB)", file.file_name, file.bytes as f64 / 1024.0);
        }

        let _ = writeln!(out, "\nRecent sync runs: {}", self.runs.len());
        for run in &self.runs {
            let _ = writeln!(
                out,
                "  {} {} processed={} ai={} failed={} next_page={}",
                run.started_at.format("%Y-%m-%d %H:%M"),
                run.profile,
                run.processed,
                run.ai_transcripts,
                run.failed,
                run.next_page_cursor
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_workspace_has_empty_history() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = load_history(
            &dir.path().join("last_generation.json"),
            &dir.path().join("archive"),
            &dir.path().join("reports"),
            5,
        )
        .expect("history");
        assert!(history.latest.is_none());
        assert!(history.archived.is_empty());
        assert!(history.runs.is_empty());
        assert!(history.render().contains("No import has been generated yet."));
    }

    #[test]
    fn archived_imports_list_newest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("archive");
        std::fs::create_dir_all(&archive).expect("mkdir");
        std::fs::write(archive.join("crm_import_2025-11-15T14-30-45.csv"), "a").expect("write");
        std::fs::write(archive.join("crm_import_2025-11-22T06-00-00.csv"), "bb").expect("write");
        std::fs::write(archive.join("unrelated.csv"), "c").expect("write");
        std::fs::write(
            dir.path().join("last_generation.json"),
            r#"{"generatedAt":"2025-11-22T06:00:00Z","totalRecords":4,"contactMatches":3,"accountMatches":2,"driveUrls":4,"archiveFile":"crm_import_2025-11-22T06-00-00.csv"}"#,
        )
        .expect("write");

        let history = load_history(
            &dir.path().join("last_generation.json"),
            &archive,
            &dir.path().join("reports"),
            5,
        )
        .expect("history");
        let names: Vec<_> = history.archived.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["crm_import_2025-11-22T06-00-00.csv", "crm_import_2025-11-15T14-30-45.csv"]
        );
        assert_eq!(history.archived[0].bytes, 2);
        let rendered = history.render();
        assert!(rendered.contains("Contact matches: 3 (75.0%)"));
        assert!(rendered.contains("Account matches: 2 (50.0%)"));
    }
}
