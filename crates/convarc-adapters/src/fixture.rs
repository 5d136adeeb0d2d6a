use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convarc_core::Sentence;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{AdapterError, ConversationApi, Page, Paging};

/// API operations, used to count calls and to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Endpoint {
    Conversations,
    Sentences,
    CallActivity,
    Note,
    Person,
    Account,
    CallUuid,
}

/// Captured API responses for offline runs and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureBundle {
    pub fixture_id: String,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Conversation list pages in page order (page 1 first).
    #[serde(default)]
    pub conversation_pages: Vec<Vec<JsonValue>>,
    /// Sentences per transcription id, in the order the API returns them.
    #[serde(default)]
    pub sentences: BTreeMap<String, Vec<Sentence>>,
    #[serde(default)]
    pub call_activities: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub note_records: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub people: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub accounts: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub call_uuid_conversations: BTreeMap<String, Vec<JsonValue>>,
}

pub fn load_fixture_bundle(path: impl AsRef<Path>) -> Result<FixtureBundle> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// In-memory [`ConversationApi`] with per-endpoint call counters and
/// injectable failures.
#[derive(Debug, Default)]
pub struct FixtureApi {
    bundle: FixtureBundle,
    failures: HashSet<(Endpoint, String)>,
    calls: Mutex<HashMap<Endpoint, usize>>,
}

const ANY_KEY: &str = "*";

impl FixtureApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bundle(bundle: FixtureBundle) -> Self {
        Self {
            bundle,
            ..Self::default()
        }
    }

    pub fn bundle(&self) -> &FixtureBundle {
        &self.bundle
    }

    /// Splits `records` into pages of `page_size`.
    pub fn with_conversations(mut self, records: Vec<JsonValue>, page_size: usize) -> Self {
        self.bundle.conversation_pages = records
            .chunks(page_size.max(1))
            .map(<[JsonValue]>::to_vec)
            .collect();
        self
    }

    pub fn with_conversation_pages(mut self, pages: Vec<Vec<JsonValue>>) -> Self {
        self.bundle.conversation_pages = pages;
        self
    }

    pub fn with_sentences(mut self, transcription_id: &str, sentences: Vec<Sentence>) -> Self {
        self.bundle
            .sentences
            .insert(transcription_id.to_string(), sentences);
        self
    }

    pub fn with_call_activity(mut self, id: &str, payload: JsonValue) -> Self {
        self.bundle.call_activities.insert(id.to_string(), payload);
        self
    }

    pub fn with_note(mut self, id: &str, payload: JsonValue) -> Self {
        self.bundle.note_records.insert(id.to_string(), payload);
        self
    }

    pub fn with_person(mut self, id: &str, payload: JsonValue) -> Self {
        self.bundle.people.insert(id.to_string(), payload);
        self
    }

    pub fn with_account(mut self, id: &str, payload: JsonValue) -> Self {
        self.bundle.accounts.insert(id.to_string(), payload);
        self
    }

    pub fn with_call_uuid(mut self, call_uuid: &str, conversations: Vec<JsonValue>) -> Self {
        self.bundle
            .call_uuid_conversations
            .insert(call_uuid.to_string(), conversations);
        self
    }

    /// Makes `endpoint` fail for `key` (an id, a call uuid, or a page number
    /// for conversation pages). `"*"` fails every call to the endpoint.
    pub fn failing(mut self, endpoint: Endpoint, key: &str) -> Self {
        self.failures.insert((endpoint, key.to_string()));
        self
    }

    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(&endpoint).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record_call(&self, endpoint: Endpoint, key: &str) -> Result<(), AdapterError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(endpoint).or_default() += 1;
        }
        if self.failures.contains(&(endpoint, key.to_string()))
            || self.failures.contains(&(endpoint, ANY_KEY.to_string()))
        {
            return Err(AdapterError::Message(format!(
                "injected {endpoint:?} failure for {key}"
            )));
        }
        Ok(())
    }

    fn detail(
        &self,
        endpoint: Endpoint,
        kind: &'static str,
        map: &BTreeMap<String, JsonValue>,
        id: &str,
    ) -> Result<JsonValue, AdapterError> {
        self.record_call(endpoint, id)?;
        map.get(id).cloned().ok_or_else(|| AdapterError::NotFound {
            kind,
            id: id.to_string(),
        })
    }
}

#[async_trait]
impl ConversationApi for FixtureApi {
    async fn conversations_page(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Page<JsonValue>, AdapterError> {
        self.record_call(Endpoint::Conversations, &page.to_string())?;
        let pages = &self.bundle.conversation_pages;
        let index = page.saturating_sub(1) as usize;
        let data = pages.get(index).cloned().unwrap_or_default();
        let total: usize = pages.iter().map(Vec::len).sum();
        let next_page = (index + 1 < pages.len()).then_some(page + 1);
        Ok(Page {
            data,
            paging: Paging {
                current_page: Some(page),
                next_page,
                per_page: Some(per_page),
                total_count: Some(total as u64),
            },
        })
    }

    async fn sentences_page(
        &self,
        transcription_id: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Sentence>, AdapterError> {
        self.record_call(Endpoint::Sentences, transcription_id)?;
        let all = self
            .bundle
            .sentences
            .get(transcription_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let per_page = per_page.max(1) as usize;
        let data = all
            .chunks(per_page)
            .nth(page.saturating_sub(1) as usize)
            .map(<[Sentence]>::to_vec)
            .unwrap_or_default();
        let total_pages = all.len().div_ceil(per_page);
        Ok(Page {
            data,
            paging: Paging {
                current_page: Some(page),
                next_page: ((page as usize) < total_pages).then_some(page + 1),
                per_page: Some(per_page as u32),
                total_count: Some(all.len() as u64),
            },
        })
    }

    async fn call_activity(&self, id: &str) -> Result<JsonValue, AdapterError> {
        self.detail(
            Endpoint::CallActivity,
            "call activity",
            &self.bundle.call_activities,
            id,
        )
    }

    async fn note(&self, id: &str) -> Result<JsonValue, AdapterError> {
        self.detail(Endpoint::Note, "note", &self.bundle.note_records, id)
    }

    async fn person(&self, id: &str) -> Result<JsonValue, AdapterError> {
        self.detail(Endpoint::Person, "person", &self.bundle.people, id)
    }

    async fn account(&self, id: &str) -> Result<JsonValue, AdapterError> {
        self.detail(Endpoint::Account, "account", &self.bundle.accounts, id)
    }

    async fn conversations_for_call_uuid(
        &self,
        call_uuid: &str,
    ) -> Result<Vec<JsonValue>, AdapterError> {
        self.record_call(Endpoint::CallUuid, call_uuid)?;
        Ok(self
            .bundle
            .call_uuid_conversations
            .get(call_uuid)
            .cloned()
            .unwrap_or_default())
    }
}
