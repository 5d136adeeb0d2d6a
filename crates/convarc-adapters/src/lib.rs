//! Remote conversation source: the API contract, its HTTP and fixture-backed
//! implementations, and the paging logic the sync driver consumes.

use async_trait::async_trait;
use convarc_core::{RecordError, Sentence};
use convarc_storage::FetchError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

mod fixture;
mod salesloft;
mod source;

pub use fixture::{load_fixture_bundle, Endpoint, FixtureApi, FixtureBundle};
pub use salesloft::{SalesloftApi, DEFAULT_API_URL};
pub use source::{
    crm_id_of, ConversationWindow, PagedRecord, RemoteSource, SentenceText, MAX_PAGE_SIZE,
};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{0}")]
    Message(String),
}

/// Pagination block of a list response (`metadata.paging`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub current_page: Option<u32>,
    #[serde(default)]
    pub next_page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub total_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub paging: Paging,
}

/// One request per call; no paging loops, retries beyond the transport, or
/// error swallowing happen behind this trait.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn conversations_page(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Page<JsonValue>, AdapterError>;

    async fn sentences_page(
        &self,
        transcription_id: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Sentence>, AdapterError>;

    async fn call_activity(&self, id: &str) -> Result<JsonValue, AdapterError>;

    async fn note(&self, id: &str) -> Result<JsonValue, AdapterError>;

    async fn person(&self, id: &str) -> Result<JsonValue, AdapterError>;

    async fn account(&self, id: &str) -> Result<JsonValue, AdapterError>;

    async fn conversations_for_call_uuid(
        &self,
        call_uuid: &str,
    ) -> Result<Vec<JsonValue>, AdapterError>;
}
