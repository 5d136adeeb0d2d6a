use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use convarc_core::{format_seconds, Classification, ConversationRecord, CrmLinkage};

use crate::resolve::Resolution;

pub const TITLE_LINE: &str = "=== CONVERSATION TRANSCRIPT ===";
pub const BODY_MARKER: &str = "=== TRANSCRIPT ===";

/// `transcript_<media>_<conversation id>_<unix millis>.txt`.
pub fn artifact_file_name(record: &ConversationRecord, at: DateTime<Utc>) -> String {
    format!(
        "transcript_{}_{}_{}.txt",
        media_slug(record.media_type_or_unknown()),
        record.id,
        at.timestamp_millis()
    )
}

/// Lowercases and replaces anything outside `[a-z0-9]` with `_`.
pub fn media_slug(media_type: &str) -> String {
    media_type
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '_' })
        .collect()
}

/// Fixed-order metadata header followed by the resolved body.
pub fn render_artifact(
    record: &ConversationRecord,
    crm: Option<&CrmLinkage>,
    resolution: &Resolution,
) -> String {
    let mut out = String::new();
    let mut line = |label: &str, value: &str| {
        let _ = writeln!(out, "{label}: {value}");
    };

    line("Conversation ID", record.id.as_str());
    line("Date", record.created_at.as_deref().unwrap_or("N/A"));
    let duration = record
        .duration_secs
        .map(|secs| format!("{} seconds", format_seconds(secs)))
        .unwrap_or_else(|| "N/A".to_string());
    line("Duration", &duration);
    line("Media Type", record.media_type_or_unknown());
    line("Platform", record.platform_or_unknown());
    if let Some(id) = &resolution.transcription_id {
        line("Transcription ID", id);
    }
    if let Some(crm) = crm {
        if let Some(id) = &crm.person_crm_id {
            line("CRM Contact/Lead ID", id);
        }
        if let Some(id) = &crm.account_crm_id {
            line("CRM Account ID", id);
        }
        if let Some(id) = &crm.person_id {
            line("Source Person ID", id.as_str());
        }
        if let Some(id) = &crm.account_id {
            line("Source Account ID", id.as_str());
        }
    }
    if let Some(from) = &record.from {
        line("From", from);
    }
    if let Some(to) = &record.to {
        line("To", to);
    }

    let transcript = &resolution.transcript;
    let body = match transcript.classification {
        Classification::AiTranscript => format!(
            "[AI-GENERATED TRANSCRIPT - {} sentences]\n\n{}",
            transcript.sentence_count.unwrap_or(0),
            transcript.text
        ),
        Classification::ManualNote => {
            format!("[MANUAL NOTE - Not AI Transcript]:\n\n{}", transcript.text)
        }
        Classification::InlineText => format!("[INLINE TRANSCRIPT DATA]\n\n{}", transcript.text),
        Classification::NoTranscript => {
            format!("No transcript text found. Raw data:\n\n{}", transcript.text)
        }
    };

    format!("{TITLE_LINE}\n{out}\n{BODY_MARKER}\n\n{body}\n")
}

/// Text after the body marker, trimmed; `None` for files without one.
pub fn artifact_body(content: &str) -> Option<&str> {
    content
        .find(BODY_MARKER)
        .map(|idx| content[idx + BODY_MARKER.len()..].trim())
}

/// Value of a `Label: value` header line.
pub fn header_value<'a>(content: &'a str, label: &str) -> Option<&'a str> {
    let header = content.split(BODY_MARKER).next()?;
    header.lines().find_map(|line| {
        line.strip_prefix(label)
            .and_then(|rest| rest.strip_prefix(": "))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::ResolutionStep;
    use chrono::TimeZone;
    use convarc_core::{RemoteId, ResolvedTranscript};
    use serde_json::json;

    fn record() -> ConversationRecord {
        ConversationRecord::from_json(json!({
            "id": "c-1001",
            "media_type": "Video Call",
            "platform": "zoom",
            "duration": 640,
            "created_at": "2025-11-14T10:00:00Z",
            "from": "+15550100",
            "transcription": {"id": "T-1"}
        }))
        .expect("record")
    }

    #[test]
    fn file_names_use_a_sanitized_media_slug() {
        let at = Utc.with_ymd_and_hms(2025, 11, 14, 10, 0, 0).single().expect("ts");
        assert_eq!(
            artifact_file_name(&record(), at),
            "transcript_video_call_c-1001_1763114400000.txt"
        );
        assert_eq!(media_slug("Audio/Phone 2"), "audio_phone_2");
    }

    #[test]
    fn ai_artifact_has_header_in_fixed_order() {
        let resolution = Resolution {
            transcript: ResolvedTranscript::ai("hello world".into(), 2),
            step: ResolutionStep::DirectId,
            transcription_id: Some("T-1".into()),
        };
        let crm = CrmLinkage {
            conversation_id: RemoteId::new("c-1001"),
            person_id: Some(RemoteId::new("501")),
            person_crm_id: Some("0035g00000AbCdEAAA".into()),
            account_id: None,
            account_crm_id: None,
        };

        let text = render_artifact(&record(), Some(&crm), &resolution);
        assert_eq!(
            text,
            "=== CONVERSATION TRANSCRIPT ===\n\
             Conversation ID: c-1001\n\
             Date: 2025-11-14T10:00:00Z\n\
             Duration: 640 seconds\n\
             Media Type: Video Call\n\
             Platform: zoom\n\
             Transcription ID: T-1\n\
             CRM Contact/Lead ID: 0035g00000AbCdEAAA\n\
             Source Person ID: 501\n\
             From: +15550100\n\
             \n\
             === TRANSCRIPT ===\n\
             \n\
             [AI-GENERATED TRANSCRIPT - 2 sentences]\n\
             \n\
             hello world\n"
        );
        assert_eq!(
            artifact_body(&text),
            Some("[AI-GENERATED TRANSCRIPT - 2 sentences]\n\nhello world")
        );
        assert_eq!(header_value(&text, "Transcription ID"), Some("T-1"));
        assert_eq!(header_value(&text, "To"), None);
    }

    #[test]
    fn unknown_duration_and_raw_payload_render() {
        let record = ConversationRecord::from_json(json!({"id": 9})).expect("record");
        let resolution = Resolution {
            transcript: ResolvedTranscript::not_found("{\n  \"id\": 9\n}".into()),
            step: ResolutionStep::Exhausted,
            transcription_id: None,
        };
        let text = render_artifact(&record, None, &resolution);
        assert!(text.contains("Duration: N/A\n"));
        assert!(text.contains("Media Type: unknown\n"));
        assert!(!text.contains("Transcription ID"));
        assert!(text.ends_with("No transcript text found. Raw data:\n\n{\n  \"id\": 9\n}\n"));
    }
}
