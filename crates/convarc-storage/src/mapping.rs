use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use convarc_core::CrmMappingRow;
use tracing::{info, warn};

/// Append-only CSV log of conversation to CRM linkage rows.
///
/// Rows are never updated in place; consumers deduplicate.
#[derive(Debug, Clone)]
pub struct MappingLog {
    path: PathBuf,
}

impl MappingLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row, writing the header first when the file is new or
    /// empty. The csv writer is synchronous, so it runs on the blocking pool.
    pub async fn append(&self, row: &CrmMappingRow) -> anyhow::Result<()> {
        let path = self.path.clone();
        let row = row.clone();
        tokio::task::spawn_blocking(move || append_row(&path, &row))
            .await
            .map_err(|err| anyhow!("mapping append task failed: {err}"))?
    }

    /// All rows in file order; a missing file reads as empty. Rows that do
    /// not parse are skipped with a warning.
    pub async fn read_all(&self) -> anyhow::Result<Vec<CrmMappingRow>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_rows(&path))
            .await
            .map_err(|err| anyhow!("mapping read task failed: {err}"))?
    }
}

fn append_row(path: &Path, row: &CrmMappingRow) -> anyhow::Result<()> {
    let has_content = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(!has_content)
        .from_writer(file);
    writer
        .serialize(row)
        .with_context(|| format!("appending to {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;

    if !has_content {
        info!(path = %path.display(), "created mapping file");
    }
    Ok(())
}

fn read_rows(path: &Path) -> anyhow::Result<Vec<CrmMappingRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut rows = Vec::new();
    let mut malformed = 0usize;
    for result in reader.deserialize::<CrmMappingRow>() {
        match result {
            Ok(row) => rows.push(row),
            Err(err) => {
                malformed += 1;
                warn!(path = %path.display(), error = %err, "skipping malformed mapping row");
            }
        }
    }
    if malformed > 0 {
        warn!(malformed, kept = rows.len(), "mapping log had unreadable rows");
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(id: &str) -> CrmMappingRow {
        CrmMappingRow {
            conversation_id: id.to_string(),
            file_name: format!("transcript_video_{id}_1.txt"),
            person_id: Some("7".into()),
            person_crm_id: Some("003ABCDEFGHIJKLMNO".into()),
            account_id: None,
            account_crm_id: None,
            media_type: Some("video".into()),
            platform: Some("zoom".into()),
            date: Some("2025-11-14T10:00:00Z".into()),
            duration: Some("640".into()),
        }
    }

    #[tokio::test]
    async fn header_is_written_once_and_rows_append() {
        let dir = tempdir().expect("tempdir");
        let log = MappingLog::new(dir.path().join("data/mapping.csv"));

        log.append(&row("C1")).await.expect("first");
        log.append(&row("C2")).await.expect("second");

        let text = std::fs::read_to_string(log.path()).expect("read");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "ConversationID,Filename,PersonID,PersonCrmID,AccountID,AccountCrmID,MediaType,Platform,Date,Duration"
        );
        assert!(lines[1].starts_with("C1,transcript_video_C1_1.txt,7,003ABCDEFGHIJKLMNO,,,video"));

        let rows = log.read_all().await.expect("read back");
        assert_eq!(rows, vec![row("C1"), row("C2")]);
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped() {
        let dir = tempdir().expect("tempdir");
        let log = MappingLog::new(dir.path().join("mapping.csv"));
        log.append(&row("C1")).await.expect("first");
        let mut file = OpenOptions::new().append(true).open(log.path()).expect("open");
        std::io::Write::write_all(&mut file, b"truncated,row\n").expect("garbage");
        drop(file);
        log.append(&row("C2")).await.expect("second");

        let rows = log.read_all().await.expect("read back");
        assert_eq!(rows, vec![row("C1"), row("C2")]);
    }

    #[tokio::test]
    async fn missing_log_reads_empty() {
        let dir = tempdir().expect("tempdir");
        let log = MappingLog::new(dir.path().join("absent.csv"));
        assert!(log.read_all().await.expect("read").is_empty());
    }
}
