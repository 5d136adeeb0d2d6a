use std::sync::Arc;

use convarc_core::{assemble_sentences, ConversationRecord};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::{AdapterError, ConversationApi};

/// Largest page the conversation API accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A conversation together with the list page it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedRecord {
    pub page: u32,
    pub record: ConversationRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationWindow {
    pub records: Vec<PagedRecord>,
    /// First page a later listing should start from.
    pub next_page: u32,
    pub pages_fetched: u32,
    /// Rows dropped because they were not conversation objects with an id.
    pub malformed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceText {
    pub text: String,
    pub sentence_count: usize,
}

/// Paging and lookup operations over a [`ConversationApi`].
#[derive(Clone)]
pub struct RemoteSource {
    api: Arc<dyn ConversationApi>,
    per_page: u32,
}

impl RemoteSource {
    pub fn new(api: Arc<dyn ConversationApi>) -> Self {
        Self {
            api,
            per_page: MAX_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn page_size(&self) -> u32 {
        self.per_page
    }

    /// Reads whole pages from `start_page` until at least `max_records` rows
    /// are collected, a page comes back empty, or the source reports no
    /// further page.
    ///
    /// Pages are never cut, so the window can exceed `max_records` by part of
    /// its last page; applying the ceiling is the caller's job. On the last
    /// page the returned `next_page` still moves past it, so a later call
    /// does not re-read the exhausted tail.
    pub async fn list_conversations(
        &self,
        max_records: usize,
        start_page: u32,
    ) -> Result<ConversationWindow, AdapterError> {
        let start_page = start_page.max(1);
        let per_page = self.per_page;
        let max_pages = max_records.div_ceil(per_page as usize);
        info!(max_records, start_page, "listing conversations");

        let mut records = Vec::new();
        let mut malformed = 0usize;
        let mut current = start_page;

        while records.len() < max_records && ((current - start_page) as usize) < max_pages {
            let page = self.api.conversations_page(current, per_page).await?;
            if page.data.is_empty() {
                info!(page = current, "page returned no records; end of data");
                break;
            }

            let fetched = page.data.len();
            for raw in page.data {
                match ConversationRecord::from_json(raw) {
                    Ok(record) => records.push(PagedRecord {
                        page: current,
                        record,
                    }),
                    Err(err) => {
                        malformed += 1;
                        warn!(page = current, error = %err, "skipping malformed conversation row");
                    }
                }
            }

            if page.paging.next_page.is_none() {
                info!(page = current, "last page reached");
                current += 1;
                break;
            }
            debug!(page = current, fetched, total = records.len(), "fetched page");
            current += 1;
        }

        info!(
            count = records.len(),
            first_page = start_page,
            next_page = current,
            "conversation window ready"
        );

        Ok(ConversationWindow {
            records,
            next_page: current,
            pages_fetched: current - start_page,
            malformed,
        })
    }

    /// Fetches every sentence page of a transcription and joins the text in
    /// `order_number` order.
    pub async fn fetch_transcription_sentences(
        &self,
        transcription_id: &str,
    ) -> Result<SentenceText, AdapterError> {
        let mut sentences = Vec::new();
        let mut page = 1u32;
        let mut total_pages = 1u64;

        loop {
            let batch = self
                .api
                .sentences_page(transcription_id, page, self.per_page)
                .await?;
            let empty = batch.data.is_empty();
            sentences.extend(batch.data);

            if let (Some(total), Some(per)) = (batch.paging.total_count, batch.paging.per_page) {
                if per > 0 {
                    total_pages = total.div_ceil(u64::from(per)).max(1);
                }
            }
            page += 1;
            if empty || u64::from(page) > total_pages {
                break;
            }
        }

        let sentence_count = sentences.len();
        debug!(transcription_id, sentence_count, pages = page - 1, "fetched sentences");
        Ok(SentenceText {
            text: assemble_sentences(sentences),
            sentence_count,
        })
    }

    pub async fn fetch_call_activity(&self, id: &str) -> Result<JsonValue, AdapterError> {
        self.api.call_activity(id).await
    }

    pub async fn fetch_note_content(&self, id: &str) -> Result<JsonValue, AdapterError> {
        self.api.note(id).await
    }

    /// `None` when the lookup fails; the failure is logged, not returned.
    pub async fn fetch_person_details(&self, id: &str) -> Option<JsonValue> {
        match self.api.person(id).await {
            Ok(person) => Some(person),
            Err(err) => {
                warn!(person_id = id, error = %err, "person lookup failed");
                None
            }
        }
    }

    /// `None` when the lookup fails; the failure is logged, not returned.
    pub async fn fetch_account_details(&self, id: &str) -> Option<JsonValue> {
        match self.api.account(id).await {
            Ok(account) => Some(account),
            Err(err) => {
                warn!(account_id = id, error = %err, "account lookup failed");
                None
            }
        }
    }

    /// Scans the first conversation page for a row whose call id matches.
    pub async fn find_conversation_for_call(
        &self,
        call_id: &str,
    ) -> Result<Option<ConversationRecord>, AdapterError> {
        let page = self.api.conversations_page(1, self.per_page).await?;
        let found = page
            .data
            .into_iter()
            .filter_map(|raw| ConversationRecord::from_json(raw).ok())
            .find(|conversation| {
                conversation
                    .call_id
                    .as_ref()
                    .is_some_and(|id| id.as_str() == call_id)
            });
        if let Some(conversation) = &found {
            debug!(call_id, conversation_id = %conversation.id, "matched conversation for call");
        }
        Ok(found)
    }

    pub async fn fetch_conversation_for_call_uuid(
        &self,
        call_uuid: &str,
    ) -> Result<Option<ConversationRecord>, AdapterError> {
        let rows = self.api.conversations_for_call_uuid(call_uuid).await?;
        Ok(rows
            .into_iter()
            .find_map(|raw| ConversationRecord::from_json(raw).ok()))
    }
}

/// The CRM id carried on a person or account detail payload.
pub fn crm_id_of(detail: &JsonValue) -> Option<String> {
    match detail.get("crm_id")? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
