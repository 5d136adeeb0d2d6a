use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::http::HttpFetcher;

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
pub const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const FILE_FIELDS: &str = "id,name,webViewLink,createdTime";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
}

/// Folder-scoped remote file store used as the best-effort mirror.
#[async_trait]
pub trait DriveTarget: Send + Sync {
    async fn create_file(
        &self,
        name: &str,
        mime_type: &str,
        parent_folder_id: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<DriveFile>;

    async fn list_folder(&self, folder_id: &str) -> anyhow::Result<Vec<DriveFile>>;

    async fn delete_file(&self, file_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub enum DriveAuth {
    AccessToken(String),
    RefreshToken {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Google Drive v3 REST client.
#[derive(Debug)]
pub struct GoogleDriveClient {
    http: HttpFetcher,
    auth: DriveAuth,
    cached: Mutex<Option<CachedToken>>,
}

impl GoogleDriveClient {
    pub fn new(http: HttpFetcher, auth: DriveAuth) -> Self {
        Self {
            http,
            auth,
            cached: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        let (client_id, client_secret, refresh_token) = match &self.auth {
            DriveAuth::AccessToken(token) => return Ok(token.clone()),
            DriveAuth::RefreshToken {
                client_id,
                client_secret,
                refresh_token,
            } => (client_id, client_secret, refresh_token),
        };

        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref() {
            if current.expires_at > Instant::now() {
                return Ok(current.token.clone());
            }
        }

        let form = [
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let response: TokenResponse = self
            .http
            .send(OAUTH_TOKEN_URL, |client| client.post(OAUTH_TOKEN_URL).form(&form))
            .await
            .context("exchanging drive refresh token")?
            .json()
            .context("decoding drive token response")?;

        // Treat the token as expired a minute early.
        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(3600).saturating_sub(60));
        info!("drive access token refreshed");
        *cached = Some(CachedToken {
            token: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }
}

#[async_trait]
impl DriveTarget for GoogleDriveClient {
    async fn create_file(
        &self,
        name: &str,
        mime_type: &str,
        parent_folder_id: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<DriveFile> {
        let token = self.access_token().await?;
        let boundary = format!("convarc-{}", Uuid::new_v4().simple());
        let metadata = json!({
            "name": name,
            "parents": [parent_folder_id],
            "mimeType": mime_type,
        });
        let body = multipart_related_body(&boundary, &metadata, mime_type, &bytes);
        let url = format!("{DRIVE_UPLOAD_BASE}/files");
        let content_type = format!("multipart/related; boundary={boundary}");

        let file: DriveFile = self
            .http
            .send(&url, |client| {
                client
                    .post(&url)
                    .bearer_auth(&token)
                    .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
                    .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                    .body(body.clone())
            })
            .await
            .with_context(|| format!("uploading {name} to drive"))?
            .json()
            .with_context(|| format!("decoding drive upload response for {name}"))?;
        debug!(file_id = %file.id, name, "uploaded to drive");
        Ok(file)
    }

    async fn list_folder(&self, folder_id: &str) -> anyhow::Result<Vec<DriveFile>> {
        let token = self.access_token().await?;
        let url = format!("{DRIVE_API_BASE}/files");
        let q = format!("'{}' in parents and trashed=false", folder_id.replace('\'', "\\'"));
        let fields = format!("nextPageToken, files({FILE_FIELDS})");

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("q", q.clone()),
                ("fields", fields.clone()),
                ("pageSize", "1000".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: FileListResponse = self
                .http
                .get_json(&url, &token, &query)
                .await
                .with_context(|| format!("listing drive folder {folder_id}"))?;
            files.extend(page.files);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(files)
    }

    async fn delete_file(&self, file_id: &str) -> anyhow::Result<()> {
        let token = self.access_token().await?;
        let url = format!("{DRIVE_API_BASE}/files/{file_id}");
        self.http
            .send(&url, |client| client.delete(&url).bearer_auth(&token))
            .await
            .with_context(|| format!("deleting drive file {file_id}"))?;
        Ok(())
    }
}

/// Builds a `multipart/related` body: JSON metadata part, then the media part.
pub fn multipart_related_body(
    boundary: &str,
    metadata: &serde_json::Value,
    mime_type: &str,
    bytes: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
