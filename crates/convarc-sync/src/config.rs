use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use convarc_adapters::DEFAULT_API_URL;
use convarc_storage::{BackoffPolicy, DriveAuth, HttpClientConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mondays at 06:00 (seconds field first).
pub const DEFAULT_SYNC_CRON: &str = "0 0 6 * * Mon";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub data_dir: PathBuf,
    pub download_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub profiles_path: PathBuf,
    pub drive_folder_id: Option<String>,
    pub drive_auth: Option<DriveAuth>,
    pub http_timeout_secs: u64,
    pub http_max_retries: usize,
    pub user_agent: String,
    pub sync_cron: String,
    pub crm_export: Option<PathBuf>,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let path_or = |name: &str, default: &str| {
            var(name)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default))
        };

        let drive_auth = match (
            var("GOOGLE_DRIVE_ACCESS_TOKEN"),
            var("GOOGLE_OAUTH_CLIENT_ID"),
            var("GOOGLE_OAUTH_CLIENT_SECRET"),
            var("GOOGLE_OAUTH_REFRESH_TOKEN"),
        ) {
            (Some(token), _, _, _) => Some(DriveAuth::AccessToken(token)),
            (None, Some(client_id), Some(client_secret), Some(refresh_token)) => {
                Some(DriveAuth::RefreshToken {
                    client_id,
                    client_secret,
                    refresh_token,
                })
            }
            _ => None,
        };

        Self {
            api_key: var("SALESLOFT_API_KEY"),
            api_url: var("SALESLOFT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            data_dir: path_or("CONVARC_DATA_DIR", "./data"),
            download_dir: path_or("CONVARC_DOWNLOAD_DIR", "./recordings"),
            reports_dir: path_or("CONVARC_REPORTS_DIR", "./reports"),
            profiles_path: path_or("CONVARC_PROFILES", "./profiles.yaml"),
            drive_folder_id: var("GOOGLE_DRIVE_FOLDER_ID"),
            drive_auth,
            http_timeout_secs: var("CONVARC_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            http_max_retries: var("CONVARC_HTTP_MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            user_agent: var("CONVARC_USER_AGENT")
                .unwrap_or_else(|| format!("convarc/{}", env!("CARGO_PKG_VERSION"))),
            sync_cron: var("CONVARC_SYNC_CRON").unwrap_or_else(|| DEFAULT_SYNC_CRON.to_string()),
            crm_export: var("CONVARC_CRM_EXPORT").map(PathBuf::from),
        }
    }

    /// Same layout rooted at `root`, with no credentials or drive.
    pub fn rooted_at(root: &Path) -> Self {
        Self::from_lookup(|name| match name {
            "CONVARC_DATA_DIR" => Some(root.join("data").display().to_string()),
            "CONVARC_DOWNLOAD_DIR" => Some(root.join("recordings").display().to_string()),
            "CONVARC_REPORTS_DIR" => Some(root.join("reports").display().to_string()),
            "CONVARC_PROFILES" => Some(root.join("profiles.yaml").display().to_string()),
            _ => None,
        })
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.http_max_retries,
                ..BackoffPolicy::default()
            },
        }
    }

    pub fn progress_path(&self) -> PathBuf {
        self.data_dir.join("processed_conversation_ids.json")
    }

    pub fn legacy_progress_path(&self) -> PathBuf {
        self.data_dir.join("processed_call_ids.json")
    }

    pub fn mapping_path(&self) -> PathBuf {
        self.data_dir.join("transcript_crm_mapping.csv")
    }

    pub fn import_ready_path(&self) -> PathBuf {
        self.data_dir.join("crm_import_ready.csv")
    }

    pub fn import_archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    pub fn generation_metadata_path(&self) -> PathBuf {
        self.data_dir.join("last_generation.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Stop once a target number of AI transcripts is saved.
    Limited,
    /// Drain the whole scanned window.
    Unlimited,
}

/// The knobs one sync run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProfile {
    pub mode: SyncMode,
    #[serde(default)]
    pub target_ai_transcripts: Option<usize>,
    pub max_records_to_scan: usize,
    #[serde(default = "default_min_duration_secs")]
    pub min_duration_secs: f64,
    #[serde(default = "default_api_delay_ms")]
    pub api_delay_ms: u64,
}

fn default_min_duration_secs() -> f64 {
    30.0
}

fn default_api_delay_ms() -> u64 {
    100
}

#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("unknown run profile {0:?}")]
    Unknown(String),
    #[error("profile {0:?} is limited but sets no target_ai_transcripts")]
    MissingTarget(String),
    #[error("profile {0:?} scans zero records")]
    NothingToScan(String),
}

impl RunProfile {
    pub fn test() -> Self {
        Self {
            mode: SyncMode::Limited,
            target_ai_transcripts: Some(10),
            max_records_to_scan: 50,
            min_duration_secs: default_min_duration_secs(),
            api_delay_ms: default_api_delay_ms(),
        }
    }

    pub fn batch() -> Self {
        Self {
            mode: SyncMode::Unlimited,
            target_ai_transcripts: None,
            max_records_to_scan: 500,
            min_duration_secs: default_min_duration_secs(),
            api_delay_ms: default_api_delay_ms(),
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), ProfileError> {
        if self.max_records_to_scan == 0 {
            return Err(ProfileError::NothingToScan(name.to_string()));
        }
        if self.mode == SyncMode::Limited && self.target_ai_transcripts.is_none() {
            return Err(ProfileError::MissingTarget(name.to_string()));
        }
        Ok(())
    }

    pub fn api_delay(&self) -> Duration {
        Duration::from_millis(self.api_delay_ms)
    }

    /// The AI-transcript count that ends a limited run early.
    pub fn stop_target(&self) -> Option<usize> {
        match self.mode {
            SyncMode::Limited => self.target_ai_transcripts,
            SyncMode::Unlimited => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProfilesFile {
    #[serde(default)]
    profiles: BTreeMap<String, RunProfile>,
}

/// Named run profiles: the built-in `test` and `batch` plus any from YAML.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSet {
    profiles: BTreeMap<String, RunProfile>,
}

impl Default for ProfileSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileSet {
    pub fn builtin() -> Self {
        let profiles = BTreeMap::from([
            ("test".to_string(), RunProfile::test()),
            ("batch".to_string(), RunProfile::batch()),
        ]);
        Self { profiles }
    }

    /// Built-ins overlaid with the YAML file; a missing file is not an error.
    pub fn load(path: &Path) -> Result<Self> {
        let mut set = Self::builtin();
        if !path.exists() {
            return Ok(set);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        set.merge_yaml(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(set)
    }

    pub fn merge_yaml(&mut self, text: &str) -> Result<()> {
        let file: ProfilesFile = serde_yaml::from_str(text)?;
        self.profiles.extend(file.profiles);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<RunProfile, ProfileError> {
        let profile = self
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| ProfileError::Unknown(name.to_string()))?;
        profile.validate(name)?;
        Ok(profile)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}
