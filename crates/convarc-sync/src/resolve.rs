//! Fallback chain that turns a conversation into transcript text.
//!
//! Steps run cheapest first and the first hit wins:
//! 1. sentences for the known transcription id
//! 2. sentences for an id recovered by looking the conversation up again
//!    (by call id, then by call uuid)
//! 3. inline text on a `recordings` entry
//! 4. legacy top-level transcript fields
//! 5. the manual note, fetched when only its id is present
//! 6. the raw payload as a diagnostic
//!
//! Steps 3 to 5 search the conversation payload and, when that payload has
//! neither recordings nor a note, the linked call activity.

use convarc_adapters::{AdapterError, RemoteSource};
use convarc_core::{ConversationRecord, ResolvedTranscript, TranscriptionRef};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

/// Result of one fallback step.
#[derive(Debug)]
pub enum StepOutcome<T> {
    Found(T),
    NotFound,
    Failed(AdapterError),
}

impl<T> StepOutcome<T> {
    fn from_result(result: Result<Option<T>, AdapterError>) -> Self {
        match result {
            Ok(Some(value)) => Self::Found(value),
            Ok(None) => Self::NotFound,
            Err(err) => Self::Failed(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStep {
    DirectId,
    ConversationLookup,
    Recording,
    TopLevelField,
    ManualNote,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub transcript: ResolvedTranscript,
    pub step: ResolutionStep,
    /// The transcription whose sentences were used, or the one on the record.
    pub transcription_id: Option<String>,
}

const NOTE_TEXT_FIELDS: [&str; 3] = ["content", "text", "body"];

#[derive(Clone)]
pub struct TranscriptResolver {
    source: RemoteSource,
}

impl TranscriptResolver {
    pub fn new(source: RemoteSource) -> Self {
        Self { source }
    }

    /// Never fails: every step's error is logged and treated as a miss.
    pub async fn resolve(
        &self,
        record: &ConversationRecord,
        transcription_id: Option<&str>,
    ) -> Resolution {
        let direct_id = transcription_id
            .map(str::to_string)
            .or_else(|| record.transcription.id().map(str::to_string));

        if let Some(id) = &direct_id {
            match self.sentences(id).await {
                StepOutcome::Found(transcript) => {
                    return found(transcript, ResolutionStep::DirectId, Some(id.clone()));
                }
                StepOutcome::NotFound => debug!(transcription_id = %id, "no sentences for transcription"),
                StepOutcome::Failed(err) => {
                    warn!(transcription_id = %id, error = %err, "sentence fetch failed")
                }
            }
        }

        match self.conversation_lookup(record, direct_id.as_deref()).await {
            StepOutcome::Found((transcript, id)) => {
                return found(transcript, ResolutionStep::ConversationLookup, Some(id));
            }
            StepOutcome::NotFound => debug!("conversation lookup recovered no transcript"),
            StepOutcome::Failed(err) => warn!(error = %err, "conversation lookup failed"),
        }

        for payload in self.candidate_payloads(record).await {
            if let Some(text) = recording_text(&payload) {
                return found(
                    ResolvedTranscript::inline(text),
                    ResolutionStep::Recording,
                    direct_id.clone(),
                );
            }
            if let Some(text) = top_level_text(&payload) {
                return found(
                    ResolvedTranscript::inline(text),
                    ResolutionStep::TopLevelField,
                    direct_id.clone(),
                );
            }
            match self.manual_note(&payload).await {
                StepOutcome::Found(text) => {
                    return found(
                        ResolvedTranscript::manual_note(text),
                        ResolutionStep::ManualNote,
                        direct_id.clone(),
                    );
                }
                StepOutcome::NotFound => {}
                StepOutcome::Failed(err) => warn!(error = %err, "note fetch failed"),
            }
        }

        info!(conversation_id = %record.id, "no transcript text found; saving raw payload");
        let diagnostic =
            serde_json::to_string_pretty(&record.raw).unwrap_or_else(|_| record.raw.to_string());
        found(
            ResolvedTranscript::not_found(diagnostic),
            ResolutionStep::Exhausted,
            direct_id,
        )
    }

    async fn sentences(&self, transcription_id: &str) -> StepOutcome<ResolvedTranscript> {
        StepOutcome::from_result(
            self.source
                .fetch_transcription_sentences(transcription_id)
                .await
                .map(|sentences| {
                    (sentences.sentence_count > 0)
                        .then(|| ResolvedTranscript::ai(sentences.text, sentences.sentence_count))
                }),
        )
    }

    async fn conversation_lookup(
        &self,
        record: &ConversationRecord,
        already_tried: Option<&str>,
    ) -> StepOutcome<(ResolvedTranscript, String)> {
        let lookup_key = record.call_id.as_ref().unwrap_or(&record.id);
        let mut conversation = None;
        let mut lookup_error = None;

        match self.source.find_conversation_for_call(lookup_key.as_str()).await {
            Ok(found) => conversation = found,
            Err(err) => {
                debug!(call_id = %lookup_key, error = %err, "conversation lookup by call id failed");
                lookup_error = Some(err);
            }
        }

        if conversation.is_none() {
            if let Some(call_uuid) = &record.call_uuid {
                match self.source.fetch_conversation_for_call_uuid(call_uuid).await {
                    Ok(found) => conversation = found,
                    Err(err) => return StepOutcome::Failed(err),
                }
            }
        }

        let Some(conversation) = conversation else {
            return match lookup_error {
                Some(err) => StepOutcome::Failed(err),
                None => StepOutcome::NotFound,
            };
        };
        let Some(recovered) = conversation.transcription.id() else {
            return StepOutcome::NotFound;
        };
        if already_tried == Some(recovered) {
            return StepOutcome::NotFound;
        }

        info!(transcription_id = recovered, "fetching sentences for recovered transcription");
        match self.sentences(recovered).await {
            StepOutcome::Found(transcript) => {
                StepOutcome::Found((transcript, recovered.to_string()))
            }
            StepOutcome::NotFound => StepOutcome::NotFound,
            StepOutcome::Failed(err) => StepOutcome::Failed(err),
        }
    }

    async fn candidate_payloads(&self, record: &ConversationRecord) -> Vec<JsonValue> {
        let mut payloads = vec![record.raw.clone()];
        let has_legacy_content = record.raw.get("recordings").is_some_and(|v| !v.is_null())
            || record.raw.get("note").is_some_and(|v| !v.is_null());
        if has_legacy_content {
            return payloads;
        }
        if let Some(call_id) = &record.call_id {
            match self.source.fetch_call_activity(call_id.as_str()).await {
                Ok(activity) => payloads.push(activity),
                Err(err) => debug!(call_id = %call_id, error = %err, "call activity unavailable"),
            }
        }
        payloads
    }

    async fn manual_note(&self, payload: &JsonValue) -> StepOutcome<String> {
        let note = match payload.get("note") {
            None | Some(JsonValue::Null) => return StepOutcome::NotFound,
            Some(JsonValue::String(text)) => {
                return match non_empty(text) {
                    Some(text) => StepOutcome::Found(text),
                    None => StepOutcome::NotFound,
                };
            }
            Some(note) => note,
        };

        if let Some(note_id) = note.get("id").and_then(id_text) {
            info!(note_id = %note_id, "fetching manual note");
            return match self.source.fetch_note_content(&note_id).await {
                Ok(fetched) => StepOutcome::Found(note_text(&fetched)),
                Err(err) => StepOutcome::Failed(err),
            };
        }
        StepOutcome::Found(note_text(note))
    }
}

fn found(
    transcript: ResolvedTranscript,
    step: ResolutionStep,
    transcription_id: Option<String>,
) -> Resolution {
    Resolution {
        transcript,
        step,
        transcription_id,
    }
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn string_field(value: &JsonValue, key: &str) -> Option<String> {
    value.get(key).and_then(JsonValue::as_str).and_then(non_empty)
}

fn id_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => non_empty(s),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn recording_text(payload: &JsonValue) -> Option<String> {
    payload
        .get("recordings")?
        .as_array()?
        .iter()
        .find_map(|recording| {
            string_field(recording, "transcript").or_else(|| string_field(recording, "transcription"))
        })
}

/// `transcript`, then inline transcription text, then `conversation_transcript`.
/// A bare `transcription` string is an id, never text.
fn top_level_text(payload: &JsonValue) -> Option<String> {
    string_field(payload, "transcript")
        .or_else(|| {
            TranscriptionRef::from_payload(payload)
                .inline_text()
                .map(str::to_string)
        })
        .or_else(|| string_field(payload, "conversation_transcript"))
}

/// First content-bearing field, else the whole note as pretty JSON.
fn note_text(note: &JsonValue) -> String {
    NOTE_TEXT_FIELDS
        .iter()
        .find_map(|key| string_field(note, key))
        .unwrap_or_else(|| serde_json::to_string_pretty(note).unwrap_or_else(|_| note.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use convarc_adapters::{Endpoint, FixtureApi};
    use convarc_core::{Classification, Sentence};
    use serde_json::json;

    fn resolver(api: FixtureApi) -> (Arc<FixtureApi>, TranscriptResolver) {
        let api = Arc::new(api);
        (api.clone(), TranscriptResolver::new(RemoteSource::new(api)))
    }

    fn record(raw: JsonValue) -> ConversationRecord {
        ConversationRecord::from_json(raw).expect("record")
    }

    fn sentence(order_number: i64, text: &str) -> Sentence {
        Sentence {
            order_number,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn direct_id_sentences_are_ordered_and_counted() {
        let (_, resolver) = resolver(
            FixtureApi::new().with_sentences("T1", vec![sentence(2, "world"), sentence(1, "hello")]),
        );
        let resolution = resolver
            .resolve(&record(json!({"id": "C1", "transcription": {"id": "T1"}})), None)
            .await;

        assert_eq!(resolution.transcript.text, "hello world");
        assert_eq!(resolution.transcript.classification, Classification::AiTranscript);
        assert_eq!(resolution.transcript.sentence_count, Some(2));
        assert_eq!(resolution.step, ResolutionStep::DirectId);
        assert_eq!(resolution.transcription_id.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn direct_id_hit_skips_conversation_lookup() {
        let (api, resolver) = resolver(
            FixtureApi::new()
                .with_sentences("T1", vec![sentence(1, "direct")])
                .with_sentences("T2", vec![sentence(1, "recovered")])
                .with_conversation_pages(vec![vec![
                    json!({"id": "other", "call_id": "55", "transcription": {"id": "T2"}}),
                ]]),
        );
        let resolution = resolver
            .resolve(
                &record(json!({"id": "C1", "call_id": "55", "transcription": {"id": "T1"}})),
                None,
            )
            .await;

        assert_eq!(resolution.transcript.text, "direct");
        assert_eq!(api.calls(Endpoint::Conversations), 0);
        assert_eq!(api.calls(Endpoint::CallUuid), 0);
    }

    #[tokio::test]
    async fn conversation_lookup_recovers_a_different_transcription() {
        let (api, resolver) = resolver(
            FixtureApi::new()
                .with_sentences("T2", vec![sentence(1, "recovered text")])
                .with_conversation_pages(vec![vec![
                    json!({"id": "other", "call_id": "55", "transcription": {"id": "T2"}}),
                ]]),
        );
        let resolution = resolver
            .resolve(
                &record(json!({"id": "C1", "call_id": "55", "transcription": {"id": "T1"}})),
                None,
            )
            .await;

        assert_eq!(resolution.step, ResolutionStep::ConversationLookup);
        assert_eq!(resolution.transcription_id.as_deref(), Some("T2"));
        assert_eq!(resolution.transcript.text, "recovered text");
        assert_eq!(api.calls(Endpoint::Sentences), 2);
    }

    #[tokio::test]
    async fn call_uuid_lookup_runs_after_call_id_lookup_fails() {
        let (api, resolver) = resolver(
            FixtureApi::new()
                .failing(Endpoint::Conversations, "*")
                .with_call_uuid("uuid-1", vec![json!({"id": "x", "transcription": {"id": "T9"}})])
                .with_sentences("T9", vec![sentence(1, "via uuid")]),
        );
        let resolution = resolver
            .resolve(&record(json!({"id": "C1", "call_uuid": "uuid-1", "transcription": {"id": "T1"}})), None)
            .await;

        assert_eq!(resolution.transcript.text, "via uuid");
        assert_eq!(api.calls(Endpoint::CallUuid), 1);
    }

    #[tokio::test]
    async fn recovered_id_equal_to_tried_id_is_not_refetched() {
        let (api, resolver) = resolver(FixtureApi::new().with_conversation_pages(vec![vec![
            json!({"id": "C1", "call_id": "C1", "transcription": {"id": "T1"}}),
        ]]));
        let resolution = resolver
            .resolve(&record(json!({"id": "C1", "call_id": "C1", "transcription": {"id": "T1"}})), None)
            .await;

        assert_eq!(resolution.step, ResolutionStep::Exhausted);
        assert_eq!(api.calls(Endpoint::Sentences), 1);
    }

    #[tokio::test]
    async fn empty_sentences_fall_back_to_the_fetched_note() {
        let (api, resolver) = resolver(
            FixtureApi::new()
                .with_sentences("T3", Vec::new())
                .with_note("N1", json!({"id": "N1", "content": "called back later"})),
        );
        let resolution = resolver
            .resolve(
                &record(json!({"id": "C3", "transcription": {"id": "T3"}, "note": {"id": "N1"}})),
                None,
            )
            .await;

        assert_eq!(resolution.transcript.text, "called back later");
        assert_eq!(resolution.transcript.classification, Classification::ManualNote);
        assert_eq!(resolution.transcript.sentence_count, None);
        assert_eq!(api.calls(Endpoint::Note), 1);
        assert_eq!(api.calls(Endpoint::CallActivity), 0);
    }

    #[tokio::test]
    async fn recordings_and_top_level_fields_are_inline_text() {
        let (_, resolver) = resolver(FixtureApi::new());

        let from_recording = resolver
            .resolve(
                &record(json!({
                    "id": "C4",
                    "transcription": {"id": "T4"},
                    "recordings": [{"url": "x"}, {"transcription": "recorded words"}],
                    "transcript": "top level words"
                })),
                None,
            )
            .await;
        assert_eq!(from_recording.transcript.text, "recorded words");
        assert_eq!(from_recording.transcript.classification, Classification::InlineText);
        assert_eq!(from_recording.step, ResolutionStep::Recording);

        let inline_ref = resolver
            .resolve(
                &record(json!({"id": "C5", "transcription": {"id": "T5", "text": "inline body"}})),
                None,
            )
            .await;
        assert_eq!(inline_ref.transcript.text, "inline body");
        assert_eq!(inline_ref.step, ResolutionStep::TopLevelField);
    }

    #[tokio::test]
    async fn note_objects_without_content_are_serialized() {
        let (_, resolver) = resolver(FixtureApi::new());
        let resolution = resolver
            .resolve(
                &record(json!({"id": "C6", "transcription": "T6", "note": {"kind": "call", "tags": []}})),
                None,
            )
            .await;

        assert_eq!(resolution.transcript.classification, Classification::ManualNote);
        assert!(resolution.transcript.text.contains("\"kind\": \"call\""));
    }

    #[tokio::test]
    async fn call_activity_is_fetched_when_the_payload_has_no_legacy_fields() {
        let (api, resolver) = resolver(FixtureApi::new().with_call_activity(
            "77",
            json!({"id": 77, "note": "spoke with procurement"}),
        ));
        let resolution = resolver
            .resolve(&record(json!({"id": "C7", "call_id": "77", "transcription": {"id": "T7"}})), None)
            .await;

        assert_eq!(resolution.transcript.text, "spoke with procurement");
        assert_eq!(resolution.transcript.classification, Classification::ManualNote);
        assert_eq!(api.calls(Endpoint::CallActivity), 1);
    }

    #[tokio::test]
    async fn every_miss_yields_the_raw_payload() {
        let (_, resolver) = resolver(
            FixtureApi::new()
                .failing(Endpoint::Sentences, "*")
                .failing(Endpoint::Note, "*"),
        );
        let resolution = resolver
            .resolve(
                &record(json!({"id": "C8", "transcription": {"id": "T8"}, "note": {"id": "N8"}})),
                None,
            )
            .await;

        assert_eq!(resolution.transcript.classification, Classification::NoTranscript);
        assert_eq!(resolution.step, ResolutionStep::Exhausted);
        assert!(resolution.transcript.text.contains("\"id\": \"C8\""));
        assert_eq!(resolution.transcription_id.as_deref(), Some("T8"));
    }
}
