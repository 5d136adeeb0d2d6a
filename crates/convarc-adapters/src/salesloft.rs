use async_trait::async_trait;
use convarc_core::Sentence;
use convarc_storage::HttpFetcher;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{AdapterError, ConversationApi, Page, Paging};

pub const DEFAULT_API_URL: &str = "https://api.salesloft.com/v2";

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    data: Option<Vec<T>>,
    metadata: Option<Metadata>,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    paging: Option<Paging>,
}

impl<T> From<ListEnvelope<T>> for Page<T> {
    fn from(envelope: ListEnvelope<T>) -> Self {
        Page {
            data: envelope.data.unwrap_or_default(),
            paging: envelope
                .metadata
                .and_then(|m| m.paging)
                .unwrap_or_default(),
        }
    }
}

/// Bearer-authenticated client for the conversation REST API.
#[derive(Debug, Clone)]
pub struct SalesloftApi {
    http: HttpFetcher,
    base_url: String,
    api_key: String,
}

impl SalesloftApi {
    pub fn new(http: HttpFetcher, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, AdapterError> {
        let url = self.url(path);
        debug!(%url, "salesloft request");
        Ok(self.http.get_json(&url, &self.api_key, query).await?)
    }

    async fn get_detail(&self, path: &str) -> Result<JsonValue, AdapterError> {
        let value: JsonValue = self.get(path, &[]).await?;
        Ok(unwrap_data(value))
    }
}

/// Detail responses wrap the object in `data`; bare objects pass through.
fn unwrap_data(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(mut map) => match map.remove("data") {
            Some(data) if !data.is_null() => data,
            _ => JsonValue::Object(map),
        },
        other => other,
    }
}

fn paging_query(page: u32, per_page: u32) -> [(&'static str, String); 2] {
    [("per_page", per_page.to_string()), ("page", page.to_string())]
}

#[async_trait]
impl ConversationApi for SalesloftApi {
    async fn conversations_page(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Page<JsonValue>, AdapterError> {
        let envelope: ListEnvelope<JsonValue> = self
            .get("conversations.json", &paging_query(page, per_page))
            .await?;
        Ok(envelope.into())
    }

    async fn sentences_page(
        &self,
        transcription_id: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Sentence>, AdapterError> {
        let envelope: ListEnvelope<Sentence> = self
            .get(
                &format!("transcriptions/{transcription_id}/sentences.json"),
                &paging_query(page, per_page),
            )
            .await?;
        Ok(envelope.into())
    }

    async fn call_activity(&self, id: &str) -> Result<JsonValue, AdapterError> {
        self.get_detail(&format!("activities/calls/{id}.json")).await
    }

    async fn note(&self, id: &str) -> Result<JsonValue, AdapterError> {
        self.get_detail(&format!("notes/{id}.json")).await
    }

    async fn person(&self, id: &str) -> Result<JsonValue, AdapterError> {
        self.get_detail(&format!("people/{id}.json")).await
    }

    async fn account(&self, id: &str) -> Result<JsonValue, AdapterError> {
        self.get_detail(&format!("accounts/{id}.json")).await
    }

    async fn conversations_for_call_uuid(
        &self,
        call_uuid: &str,
    ) -> Result<Vec<JsonValue>, AdapterError> {
        let envelope: ListEnvelope<JsonValue> = self
            .get(
                "conversations/calls.json",
                &[("call_uuid", call_uuid.to_string())],
            )
            .await?;
        Ok(envelope.data.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convarc_storage::HttpClientConfig;
    use serde_json::json;

    #[test]
    fn urls_join_without_double_slashes() {
        let http = HttpFetcher::new(HttpClientConfig::default()).expect("client");
        let api = SalesloftApi::new(http, "https://api.example.test/v2/", "key");
        assert_eq!(
            api.url("/conversations.json"),
            "https://api.example.test/v2/conversations.json"
        );
        assert_eq!(
            api.url("notes/5.json"),
            "https://api.example.test/v2/notes/5.json"
        );
    }

    #[test]
    fn detail_payloads_unwrap_data() {
        assert_eq!(
            unwrap_data(json!({"data": {"id": 1, "crm_id": "003"}})),
            json!({"id": 1, "crm_id": "003"})
        );
        assert_eq!(unwrap_data(json!({"data": null, "id": 2})), json!({"id": 2}));
        assert_eq!(unwrap_data(json!({"content": "x"})), json!({"content": "x"}));
    }

    #[test]
    fn list_envelope_tolerates_missing_metadata() {
        let envelope: ListEnvelope<Sentence> = serde_json::from_value(json!({
            "data": [{"order_number": 1, "text": "hi"}]
        }))
        .expect("decode");
        let page: Page<Sentence> = envelope.into();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.paging, Paging::default());

        let envelope: ListEnvelope<JsonValue> = serde_json::from_value(json!({
            "data": null,
            "metadata": {"paging": {"per_page": 100, "current_page": 3, "next_page": null, "total_count": 250}}
        }))
        .expect("decode");
        let page: Page<JsonValue> = envelope.into();
        assert!(page.data.is_empty());
        assert_eq!(page.paging.total_count, Some(250));
        assert_eq!(page.paging.next_page, None);
    }
}
