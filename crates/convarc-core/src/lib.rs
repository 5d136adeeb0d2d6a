//! Core conversation, transcript, and progress types for the archive.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Opaque identifier from the remote source.
///
/// The API hands out some ids as integers and others as strings; both
/// normalize to the string form so set membership does not depend on shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) if !s.trim().is_empty() => Some(Self(s.trim().to_string())),
            JsonValue::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for RemoteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Self::from_json(&value).ok_or_else(|| de::Error::custom("expected a string or integer id"))
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RemoteId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Reference to the AI transcription attached to a conversation.
///
/// Older payloads carry a bare id string or a `transcription_id` field, newer
/// ones an object with an `id` and occasionally inline text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TranscriptionRef {
    #[default]
    Absent,
    Id(String),
    Inline { id: Option<String>, text: String },
}

impl TranscriptionRef {
    pub fn from_payload(payload: &JsonValue) -> Self {
        if let Some(value) = payload.get("transcription") {
            let parsed = Self::from_value(value);
            if parsed != Self::Absent {
                return parsed;
            }
        }
        payload
            .get("transcription_id")
            .and_then(RemoteId::from_json)
            .map(|id| Self::Id(id.into_string()))
            .unwrap_or_default()
    }

    fn from_value(value: &JsonValue) -> Self {
        match value {
            JsonValue::String(_) | JsonValue::Number(_) => RemoteId::from_json(value)
                .map(|id| Self::Id(id.into_string()))
                .unwrap_or_default(),
            JsonValue::Object(map) => {
                let id = map
                    .get("id")
                    .and_then(RemoteId::from_json)
                    .map(RemoteId::into_string);
                let text = ["text", "transcript"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(JsonValue::as_str))
                    .map(str::trim)
                    .filter(|text| !text.is_empty());
                match (id, text) {
                    (id, Some(text)) => Self::Inline {
                        id,
                        text: text.to_string(),
                    },
                    (Some(id), None) => Self::Id(id),
                    (None, None) => Self::Absent,
                }
            }
            _ => Self::Absent,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Absent => None,
            Self::Id(id) => Some(id),
            Self::Inline { id, .. } => id.as_deref(),
        }
    }

    pub fn inline_text(&self) -> Option<&str> {
        match self {
            Self::Inline { text, .. } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("conversation payload is not a JSON object")]
    NotAnObject,
    #[error("conversation payload has no usable id")]
    MissingId,
}

/// One call or meeting from the remote source, plus its raw payload for
/// the legacy field checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRecord {
    pub id: RemoteId,
    pub call_id: Option<RemoteId>,
    pub call_uuid: Option<String>,
    pub transcription: TranscriptionRef,
    pub media_type: Option<String>,
    pub platform: Option<String>,
    pub status: Option<String>,
    pub duration_secs: Option<f64>,
    pub created_at: Option<String>,
    pub person_id: Option<RemoteId>,
    pub account_id: Option<RemoteId>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub raw: JsonValue,
}

impl ConversationRecord {
    pub fn from_json(raw: JsonValue) -> Result<Self, RecordError> {
        if !raw.is_object() {
            return Err(RecordError::NotAnObject);
        }
        let id = raw
            .get("id")
            .and_then(RemoteId::from_json)
            .ok_or(RecordError::MissingId)?;

        Ok(Self {
            id,
            call_id: linked_id(&raw, "call"),
            call_uuid: json_text(&raw, "call_uuid"),
            transcription: TranscriptionRef::from_payload(&raw),
            media_type: json_text(&raw, "media_type"),
            platform: json_text(&raw, "platform"),
            status: json_text(&raw, "status"),
            duration_secs: raw.get("duration").and_then(json_number),
            created_at: json_text(&raw, "created_at"),
            person_id: linked_id(&raw, "person"),
            account_id: linked_id(&raw, "account"),
            from: json_text(&raw, "from"),
            to: json_text(&raw, "to"),
            raw,
        })
    }

    pub fn media_type_or_unknown(&self) -> &str {
        self.media_type.as_deref().unwrap_or("unknown")
    }

    pub fn platform_or_unknown(&self) -> &str {
        self.platform.as_deref().unwrap_or("unknown")
    }

    pub fn has_crm_refs(&self) -> bool {
        self.person_id.is_some() || self.account_id.is_some()
    }
}

fn json_text(value: &JsonValue, key: &str) -> Option<String> {
    match value.get(key)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads `<name>.id` (nested object) or the flat `<name>_id` field.
fn linked_id(value: &JsonValue, name: &str) -> Option<RemoteId> {
    value
        .get(name)
        .and_then(|nested| nested.get("id"))
        .and_then(RemoteId::from_json)
        .or_else(|| value.get(format!("{name}_id")).and_then(RemoteId::from_json))
}

/// One sentence fragment of an AI transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
    #[serde(default)]
    pub order_number: i64,
    #[serde(default)]
    pub text: String,
}

/// Orders fragments by `order_number` (not arrival order) and joins them with
/// single spaces.
pub fn assemble_sentences(mut sentences: Vec<Sentence>) -> String {
    sentences.sort_by_key(|s| s.order_number);
    sentences
        .into_iter()
        .map(|s| s.text)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Outcome tag for a resolved artifact, fixed by the fallback step that
/// produced the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    AiTranscript,
    ManualNote,
    InlineText,
    #[serde(rename = "NONE")]
    NoTranscript,
}

impl Classification {
    pub fn label(self) -> &'static str {
        match self {
            Self::AiTranscript => "AI_TRANSCRIPT",
            Self::ManualNote => "MANUAL_NOTE",
            Self::InlineText => "INLINE_TEXT",
            Self::NoTranscript => "NONE",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTranscript {
    pub text: String,
    pub classification: Classification,
    /// Present only for AI transcripts.
    pub sentence_count: Option<usize>,
}

impl ResolvedTranscript {
    pub fn ai(text: String, sentence_count: usize) -> Self {
        Self {
            text,
            classification: Classification::AiTranscript,
            sentence_count: Some(sentence_count),
        }
    }

    pub fn manual_note(text: String) -> Self {
        Self {
            text,
            classification: Classification::ManualNote,
            sentence_count: None,
        }
    }

    pub fn inline(text: String) -> Self {
        Self {
            text,
            classification: Classification::InlineText,
            sentence_count: None,
        }
    }

    pub fn not_found(diagnostic: String) -> Self {
        Self {
            text: diagnostic,
            classification: Classification::NoTranscript,
            sentence_count: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptArtifact {
    pub file_name: String,
    pub local_path: PathBuf,
    pub classification: Classification,
    pub remote_link: Option<String>,
}

/// Resume point for the sync driver: ids already handled plus the next page
/// to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressState {
    processed_ids: BTreeSet<String>,
    next_page_cursor: u32,
    last_updated: Option<DateTime<Utc>>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            processed_ids: BTreeSet::new(),
            next_page_cursor: 1,
            last_updated: None,
        }
    }
}

impl ProgressState {
    pub fn from_parts(
        processed_ids: impl IntoIterator<Item = String>,
        next_page_cursor: u32,
        last_updated: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            processed_ids: processed_ids.into_iter().collect(),
            next_page_cursor: next_page_cursor.max(1),
            last_updated,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.processed_ids.contains(id)
    }

    /// Returns `false` when the id was already present.
    pub fn mark_processed(&mut self, id: impl Into<String>) -> bool {
        self.processed_ids.insert(id.into())
    }

    pub fn processed_count(&self) -> usize {
        self.processed_ids.len()
    }

    pub fn processed_ids(&self) -> impl Iterator<Item = &str> {
        self.processed_ids.iter().map(String::as_str)
    }

    pub fn next_page_cursor(&self) -> u32 {
        self.next_page_cursor
    }

    /// Moves the cursor forward; a smaller page is ignored.
    pub fn advance_cursor(&mut self, page: u32) -> u32 {
        self.next_page_cursor = self.next_page_cursor.max(page);
        self.next_page_cursor
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_updated = Some(at);
    }
}

/// Person/account linkage for one conversation, with CRM ids when the
/// enrichment lookups succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmLinkage {
    pub conversation_id: RemoteId,
    pub person_id: Option<RemoteId>,
    pub person_crm_id: Option<String>,
    pub account_id: Option<RemoteId>,
    pub account_crm_id: Option<String>,
}

/// One row of the append-only CRM mapping CSV, in its fixed column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmMappingRow {
    #[serde(rename = "ConversationID")]
    pub conversation_id: String,
    #[serde(rename = "Filename")]
    pub file_name: String,
    #[serde(rename = "PersonID")]
    pub person_id: Option<String>,
    #[serde(rename = "PersonCrmID")]
    pub person_crm_id: Option<String>,
    #[serde(rename = "AccountID")]
    pub account_id: Option<String>,
    #[serde(rename = "AccountCrmID")]
    pub account_crm_id: Option<String>,
    #[serde(rename = "MediaType")]
    pub media_type: Option<String>,
    #[serde(rename = "Platform")]
    pub platform: Option<String>,
    #[serde(rename = "Date")]
    pub date: Option<String>,
    #[serde(rename = "Duration")]
    pub duration: Option<String>,
}

impl CrmMappingRow {
    pub fn new(linkage: &CrmLinkage, record: &ConversationRecord, file_name: &str) -> Self {
        Self {
            conversation_id: linkage.conversation_id.to_string(),
            file_name: file_name.to_string(),
            person_id: linkage.person_id.as_ref().map(ToString::to_string),
            person_crm_id: linkage.person_crm_id.clone(),
            account_id: linkage.account_id.as_ref().map(ToString::to_string),
            account_crm_id: linkage.account_crm_id.clone(),
            media_type: Some(record.media_type_or_unknown().to_string()),
            platform: Some(record.platform_or_unknown().to_string()),
            date: record.created_at.clone(),
            duration: record.duration_secs.map(format_seconds),
        }
    }
}

/// Renders whole seconds without a trailing `.0`.
pub fn format_seconds(secs: f64) -> String {
    if secs.fract() == 0.0 && secs.abs() < 1e15 {
        format!("{}", secs as i64)
    } else {
        format!("{secs}")
    }
}
