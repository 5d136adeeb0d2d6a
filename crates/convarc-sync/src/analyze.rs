use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::{Context, Result};
use convarc_adapters::RemoteSource;
use convarc_core::TranscriptionRef;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Breakdown {
    pub total: usize,
    pub with_transcription: usize,
}

/// Shape of the first conversation page, without processing anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    pub total: usize,
    pub with_transcription: usize,
    pub malformed: usize,
    pub by_media_type: BTreeMap<String, Breakdown>,
    pub by_platform: BTreeMap<String, Breakdown>,
    pub by_status: BTreeMap<String, usize>,
}

impl AnalysisReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Conversations analyzed: {}", self.total);
        let _ = writeln!(out, "With AI transcription: {}", self.with_transcription);
        let _ = writeln!(out, "Without: {}", self.total - self.with_transcription);
        if self.malformed > 0 {
            let _ = writeln!(out, "Malformed rows: {}", self.malformed);
        }
        for (title, table) in [("media type", &self.by_media_type), ("platform", &self.by_platform)] {
            let _ = writeln!(out, "\nBy {title}:");
            for (key, counts) in sorted_desc(table.iter().map(|(k, v)| (k, v.total))) {
                let with = table.get(key).map_or(0, |b| b.with_transcription);
                let _ = writeln!(out, "  {key:<20} {counts:>3} total ({with} with transcripts)");
            }
        }
        let _ = writeln!(out, "\nBy status:");
        for (key, count) in sorted_desc(self.by_status.iter().map(|(k, v)| (k, *v))) {
            let _ = writeln!(out, "  {key:<20} {count:>3}");
        }
        out
    }
}

fn sorted_desc<'a>(items: impl Iterator<Item = (&'a String, usize)>) -> Vec<(&'a String, usize)> {
    let mut items: Vec<_> = items.collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    items
}

pub async fn analyze_first_page(source: &RemoteSource) -> Result<AnalysisReport> {
    let window = source
        .list_conversations(source.page_size() as usize, 1)
        .await
        .context("fetching the first conversation page")?;

    let mut report = AnalysisReport {
        malformed: window.malformed,
        ..AnalysisReport::default()
    };
    for paged in &window.records {
        let record = &paged.record;
        let has_transcription = record.transcription != TranscriptionRef::Absent;
        report.total += 1;
        if has_transcription {
            report.with_transcription += 1;
        }
        for (table, key) in [
            (&mut report.by_media_type, record.media_type_or_unknown()),
            (&mut report.by_platform, record.platform_or_unknown()),
        ] {
            let entry = table.entry(key.to_string()).or_default();
            entry.total += 1;
            if has_transcription {
                entry.with_transcription += 1;
            }
        }
        let status = record.status.as_deref().unwrap_or("unknown");
        *report.by_status.entry(status.to_string()).or_default() += 1;
    }
    Ok(report)
}
