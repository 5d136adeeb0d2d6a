use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use convarc_core::{ProgressState, RemoteId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::archive::write_atomic;

/// Current on-disk format: `{lastUpdated, processedIds, nextPageCursor}`.
///
/// Older writers of this same file used `nextPage` for the cursor, so that
/// key is accepted on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressFile {
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_ids: Vec<RemoteId>,
    #[serde(default, alias = "nextPage")]
    pub next_page_cursor: Option<u32>,
}

/// Predecessor format keyed by call ids: `{processedIds, nextPage}`. Read-only.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyProgressFile {
    #[serde(default)]
    pub processed_ids: Vec<RemoteId>,
    #[serde(default)]
    pub next_page: Option<u32>,
}

/// Folds a legacy file and a current file into one state.
///
/// Legacy ids and cursor seed the state; current ids are unioned on top and
/// the current cursor replaces the legacy one when present.
pub fn upgrade_legacy(
    legacy: Option<LegacyProgressFile>,
    current: Option<ProgressFile>,
) -> ProgressState {
    let mut ids: Vec<String> = Vec::new();
    let mut cursor = 1;
    let mut last_updated = None;

    if let Some(legacy) = legacy {
        ids.extend(legacy.processed_ids.into_iter().map(RemoteId::into_string));
        cursor = legacy.next_page.unwrap_or(cursor);
    }
    if let Some(current) = current {
        ids.extend(current.processed_ids.into_iter().map(RemoteId::into_string));
        cursor = current.next_page_cursor.unwrap_or(cursor);
        last_updated = current.last_updated;
    }

    ProgressState::from_parts(ids, cursor, last_updated)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetOutcome {
    pub backups: Vec<PathBuf>,
    pub processed_ids: usize,
    pub next_page_cursor: u32,
}

#[derive(Debug, Clone)]
pub struct ProgressStore {
    current_path: PathBuf,
    legacy_path: Option<PathBuf>,
}

impl ProgressStore {
    pub fn new(current_path: impl Into<PathBuf>, legacy_path: Option<PathBuf>) -> Self {
        Self {
            current_path: current_path.into(),
            legacy_path,
        }
    }

    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    /// Loads progress; any read or parse failure yields the empty state
    /// (no ids, page 1).
    pub async fn load(&self) -> ProgressState {
        match self.try_load().await {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    path = %self.current_path.display(),
                    error = %format!("{err:#}"),
                    "could not load progress; starting from an empty state"
                );
                ProgressState::default()
            }
        }
    }

    pub async fn try_load(&self) -> anyhow::Result<ProgressState> {
        let legacy = match &self.legacy_path {
            Some(path) => read_json_if_exists::<LegacyProgressFile>(path).await?,
            None => None,
        };
        if let Some(legacy) = &legacy {
            info!(
                count = legacy.processed_ids.len(),
                "merging legacy processed ids"
            );
        }
        let current = read_json_if_exists::<ProgressFile>(&self.current_path).await?;
        Ok(upgrade_legacy(legacy, current))
    }

    /// Writes the state, keeping the previously stored cursor when no override
    /// is given. The cursor written is never lower than the stored one.
    pub async fn save(
        &self,
        state: &ProgressState,
        cursor_override: Option<u32>,
    ) -> anyhow::Result<u32> {
        let stored = self.stored_cursor().await;
        let cursor = match (cursor_override, stored) {
            (Some(next), Some(stored)) => next.max(stored),
            (Some(next), None) => next,
            (None, Some(stored)) => stored,
            (None, None) => 1,
        }
        .max(1);

        let file = ProgressFile {
            last_updated: Some(Utc::now()),
            processed_ids: state.processed_ids().map(RemoteId::from).collect(),
            next_page_cursor: Some(cursor),
        };
        let bytes = serde_json::to_vec_pretty(&file).context("serializing progress")?;
        write_atomic(&self.current_path, &bytes).await?;
        Ok(cursor)
    }

    /// Best-effort flush: a failed write is logged and the run continues.
    pub async fn checkpoint(&self, state: &ProgressState, cursor: Option<u32>) -> Option<u32> {
        match self.save(state, cursor).await {
            Ok(cursor) => Some(cursor),
            Err(err) => {
                warn!(
                    path = %self.current_path.display(),
                    error = %format!("{err:#}"),
                    "could not save progress"
                );
                None
            }
        }
    }

    /// Backs up and removes the progress files (current and legacy), resetting
    /// processed ids and the cursor. Returns `None` when nothing was stored.
    pub async fn reset(
        &self,
        backup_dir: &Path,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<ResetOutcome>> {
        let state = self.try_load().await.unwrap_or_default();
        let stamp = now.format("%Y-%m-%dT%H-%M-%S").to_string();

        let mut backups = Vec::new();
        let candidates = std::iter::once(&self.current_path).chain(self.legacy_path.iter());
        for path in candidates {
            if !fs::try_exists(path)
                .await
                .with_context(|| format!("checking {}", path.display()))?
            {
                continue;
            }
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "progress".to_string());
            let backup_path = backup_dir.join(format!("{stem}_backup_{stamp}.json"));
            let bytes = fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            write_atomic(&backup_path, &bytes).await?;
            fs::remove_file(path)
                .await
                .with_context(|| format!("removing {}", path.display()))?;
            backups.push(backup_path);
        }

        if backups.is_empty() {
            return Ok(None);
        }
        Ok(Some(ResetOutcome {
            backups,
            processed_ids: state.processed_count(),
            next_page_cursor: state.next_page_cursor(),
        }))
    }

    async fn stored_cursor(&self) -> Option<u32> {
        match read_json_if_exists::<ProgressFile>(&self.current_path).await {
            Ok(file) => file.and_then(|f| f.next_page_cursor),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "stored progress unreadable; cursor not preserved");
                None
            }
        }
    }
}

async fn read_json_if_exists<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    if !fs::try_exists(path)
        .await
        .with_context(|| format!("checking {}", path.display()))?
    {
        return Ok(None);
    }
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let value = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(value))
}
