use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use anyhow::{Context, Result};
use convarc_storage::LocalArchive;
use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};

use crate::render::{artifact_body, header_value};

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub sha256: String,
    pub files: Vec<String>,
    pub conversation_ids: Vec<String>,
    pub preview: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub total_files: usize,
    /// Files with no transcript body marker; left out of the hashing.
    pub unreadable: usize,
    pub unique_conversation_ids: usize,
    pub unique_transcription_ids: usize,
    pub unique_bodies: usize,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub shortest_body_chars: Option<usize>,
    pub longest_body_chars: Option<usize>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_groups.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Total files: {}", self.total_files);
        let _ = writeln!(out, "Unique conversation IDs: {}", self.unique_conversation_ids);
        let _ = writeln!(out, "Unique transcription IDs: {}", self.unique_transcription_ids);
        let _ = writeln!(out, "Unique transcript bodies: {}", self.unique_bodies);
        let _ = writeln!(out, "Duplicate groups: {}", self.duplicate_groups.len());
        if self.unreadable > 0 {
            let _ = writeln!(out, "Files without a transcript section: {}", self.unreadable);
        }
        if let (Some(min), Some(max)) = (self.shortest_body_chars, self.longest_body_chars) {
            let _ = writeln!(out, "Shortest body: {min} chars");
            let _ = writeln!(out, "Longest body: {max} chars");
        }
        for (index, group) in self.duplicate_groups.iter().enumerate() {
            let _ = writeln!(out, "\nDuplicate group {} ({} files):", index + 1, group.files.len());
            for file in &group.files {
                let _ = writeln!(out, "  - {file}");
            }
            let _ = writeln!(out, "  Conversation IDs: {}", group.conversation_ids.join(", "));
            let _ = writeln!(out, "  Preview: {}", group.preview);
        }
        out
    }
}

/// Hashes every transcript body in the archive and groups identical ones.
pub async fn verify_archive(archive: &LocalArchive) -> Result<VerifyReport> {
    let files = archive.list_transcripts().await?;
    let mut report = VerifyReport {
        total_files: files.len(),
        ..VerifyReport::default()
    };

    let mut conversation_ids = BTreeSet::new();
    let mut transcription_ids = BTreeSet::new();
    let mut by_hash: BTreeMap<String, DuplicateGroup> = BTreeMap::new();

    for path in &files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        let conversation_id = header_value(&content, "Conversation ID")
            .map(str::to_string)
            .or_else(|| conversation_id_from_file_name(&file_name))
            .unwrap_or_else(|| "unknown".to_string());
        conversation_ids.insert(conversation_id.clone());
        if let Some(id) = header_value(&content, "Transcription ID") {
            transcription_ids.insert(id.to_string());
        }

        let Some(body) = artifact_body(&content) else {
            warn!(file = %file_name, "no transcript section");
            report.unreadable += 1;
            continue;
        };
        let chars = body.chars().count();
        report.shortest_body_chars = Some(report.shortest_body_chars.map_or(chars, |m| m.min(chars)));
        report.longest_body_chars = Some(report.longest_body_chars.map_or(chars, |m| m.max(chars)));

        let sha256 = LocalArchive::sha256_hex(body.as_bytes());
        let group = by_hash.entry(sha256.clone()).or_insert_with(|| DuplicateGroup {
            sha256,
            files: Vec::new(),
            conversation_ids: Vec::new(),
            preview: body.chars().take(PREVIEW_CHARS).collect(),
        });
        group.files.push(file_name);
        group.conversation_ids.push(conversation_id);
    }

    report.unique_conversation_ids = conversation_ids.len();
    report.unique_transcription_ids = transcription_ids.len();
    report.unique_bodies = by_hash.len();
    report.duplicate_groups = by_hash
        .into_values()
        .filter(|group| group.files.len() > 1)
        .collect();

    info!(
        files = report.total_files,
        unique_bodies = report.unique_bodies,
        duplicate_groups = report.duplicate_groups.len(),
        "archive verified"
    );
    Ok(report)
}

/// `transcript_<media>_<id>_<millis>.txt` -> `<id>`, assuming the id itself
/// has no underscore.
fn conversation_id_from_file_name(name: &str) -> Option<String> {
    let stem = name.strip_prefix("transcript_")?.strip_suffix(".txt")?;
    let (rest, _millis) = stem.rsplit_once('_')?;
    let (_, id) = rest.rsplit_once('_')?;
    Some(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(id: &str, transcription: &str, body: &str) -> String {
        format!(
            "=== CONVERSATION TRANSCRIPT ===\nConversation ID: {id}\nTranscription ID: {transcription}\n\n=== TRANSCRIPT ===\n\n{body}\n"
        )
    }

    #[tokio::test]
    async fn duplicate_bodies_are_grouped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = LocalArchive::new(dir.path());
        archive
            .write("transcript_video_c1_1.txt", &artifact("c1", "T1", "same words"))
            .await
            .expect("write");
        archive
            .write("transcript_video_c2_2.txt", &artifact("c2", "T1", "same words"))
            .await
            .expect("write");
        archive
            .write("transcript_audio_c3_3.txt", &artifact("c3", "T3", "different and longer"))
            .await
            .expect("write");
        archive.write("stray.txt", "no markers here").await.expect("write");

        let report = verify_archive(&archive).await.expect("verify");
        assert_eq!(report.total_files, 4);
        assert_eq!(report.unreadable, 1);
        assert_eq!(report.unique_bodies, 2);
        assert_eq!(report.unique_transcription_ids, 2);
        assert_eq!(report.unique_conversation_ids, 4);
        assert_eq!(report.shortest_body_chars, Some(10));
        assert_eq!(report.longest_body_chars, Some(20));
        assert!(!report.is_clean());
        assert_eq!(report.duplicate_groups[0].conversation_ids, vec!["c1", "c2"]);
        assert!(report.render().contains("Duplicate group 1 (2 files)"));
    }

    #[test]
    fn conversation_id_falls_back_to_the_file_name() {
        assert_eq!(
            conversation_id_from_file_name("transcript_video_call_4711_1763114400000.txt").as_deref(),
            Some("4711")
        );
        assert_eq!(conversation_id_from_file_name("notes.txt"), None);
    }
}
