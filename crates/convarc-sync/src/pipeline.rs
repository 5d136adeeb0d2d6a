use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use convarc_adapters::{load_fixture_bundle, ConversationApi, FixtureApi, RemoteSource, SalesloftApi};
use convarc_storage::{
    GoogleDriveClient, HttpFetcher, LocalArchive, MappingLog, ProgressStore, ResetOutcome,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::analyze::{analyze_first_page, AnalysisReport};
use crate::config::{ProfileSet, SyncConfig};
use crate::crm_import::{build_import, ImportOutcome, ImportPaths};
use crate::driver::SyncDriver;
use crate::history::{load_history, History};
use crate::maintenance::{self, DrivePruneReport, DriveResetReport};
use crate::report::{write_run_report, RunReport};
use crate::sink::DriveMirror;
use crate::verify::{verify_archive, VerifyReport};

pub const WEEKLY_PROFILE: &str = "batch";

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyOutcome {
    pub sync: RunReport,
    pub import: Option<crate::crm_import::GenerationMetadata>,
}

/// Every job the CLI exposes, bound to one configuration.
pub struct SyncPipeline {
    config: SyncConfig,
    /// `None` when no API key is configured; only jobs that call the API
    /// fail then.
    api: Option<Arc<dyn ConversationApi>>,
    mirror: Option<DriveMirror>,
    profiles: ProfileSet,
}

impl SyncPipeline {
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn ConversationApi>,
        mirror: Option<DriveMirror>,
        profiles: ProfileSet,
    ) -> Self {
        Self {
            config,
            api: Some(api),
            mirror,
            profiles,
        }
    }

    /// Live API (or a fixture bundle when `fixture` is given), the drive
    /// mirror when configured, and profiles from the YAML file.
    pub fn from_config(config: SyncConfig, fixture: Option<&Path>) -> Result<Self> {
        let profiles = ProfileSet::load(&config.profiles_path)?;

        let api: Option<Arc<dyn ConversationApi>> = match (fixture, &config.api_key) {
            (Some(path), _) => {
                let bundle = load_fixture_bundle(path)?;
                info!(fixture_id = %bundle.fixture_id, path = %path.display(), "offline mode");
                Some(Arc::new(FixtureApi::from_bundle(bundle)))
            }
            (None, Some(api_key)) => {
                let http = HttpFetcher::new(config.http_config())?;
                Some(Arc::new(SalesloftApi::new(
                    http,
                    config.api_url.clone(),
                    api_key.clone(),
                )))
            }
            (None, None) => None,
        };

        let mirror = match (&config.drive_folder_id, &config.drive_auth, fixture) {
            (_, _, Some(_)) => None,
            (Some(folder_id), Some(auth), None) => {
                let http = HttpFetcher::new(config.http_config())?;
                Some(DriveMirror {
                    target: Arc::new(GoogleDriveClient::new(http, auth.clone())),
                    folder_id: folder_id.clone(),
                })
            }
            (Some(_), None, None) => {
                warn!("GOOGLE_DRIVE_FOLDER_ID is set but no drive credentials are; drive mirror disabled");
                None
            }
            _ => None,
        };

        Ok(Self {
            config,
            api,
            mirror,
            profiles,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    fn api(&self) -> Result<Arc<dyn ConversationApi>> {
        self.api
            .clone()
            .context("SALESLOFT_API_KEY is not set (or pass a fixture bundle)")
    }

    pub fn driver(&self) -> Result<SyncDriver> {
        Ok(SyncDriver::from_config(
            &self.config,
            self.api()?,
            self.mirror.clone(),
        ))
    }

    fn archive(&self) -> LocalArchive {
        LocalArchive::new(&self.config.download_dir)
    }

    fn require_mirror(&self) -> Result<&DriveMirror> {
        match &self.mirror {
            Some(mirror) => Ok(mirror),
            None => bail!("no drive configured: set GOOGLE_DRIVE_FOLDER_ID and drive credentials"),
        }
    }

    /// Runs the named profile and writes its report under the reports dir.
    pub async fn run_sync(&self, profile_name: &str) -> Result<RunReport> {
        let profile = self.profiles.get(profile_name)?;
        let report = self.driver()?.run(profile_name, &profile).await?;
        match write_run_report(&self.config.reports_dir, &report).await {
            Ok(dir) => info!(dir = %dir.display(), "run report written"),
            Err(err) => warn!(error = %format!("{err:#}"), "could not write run report"),
        }
        Ok(report)
    }

    pub async fn clean(&self) -> Result<Option<ResetOutcome>> {
        let progress = ProgressStore::new(
            self.config.progress_path(),
            Some(self.config.legacy_progress_path()),
        );
        maintenance::clean(&progress, &self.config.backups_dir()).await
    }

    pub async fn verify(&self) -> Result<VerifyReport> {
        verify_archive(&self.archive()).await
    }

    pub async fn analyze(&self) -> Result<AnalysisReport> {
        analyze_first_page(&RemoteSource::new(self.api()?)).await
    }

    pub async fn import_csv(&self) -> Result<ImportOutcome> {
        let Some(export) = &self.config.crm_export else {
            bail!("CONVARC_CRM_EXPORT is not set");
        };
        let paths = ImportPaths {
            output: self.config.import_ready_path(),
            archive_dir: self.config.import_archive_dir(),
            metadata: self.config.generation_metadata_path(),
        };
        build_import(
            &MappingLog::new(self.config.mapping_path()),
            export,
            self.mirror.as_ref(),
            &paths,
            Utc::now(),
        )
        .await
    }

    pub fn history(&self, max_runs: usize) -> Result<History> {
        load_history(
            &self.config.generation_metadata_path(),
            &self.config.import_archive_dir(),
            &self.config.reports_dir,
            max_runs,
        )
    }

    pub async fn drive_prune(&self, before: DateTime<Utc>, dry_run: bool) -> Result<DrivePruneReport> {
        maintenance::drive_prune(self.require_mirror()?, before, dry_run).await
    }

    pub async fn drive_reset(&self) -> Result<DriveResetReport> {
        maintenance::drive_reset(self.require_mirror()?, &self.archive()).await
    }

    /// Batch sync, then the CRM import when an export is configured.
    pub async fn run_weekly(&self) -> Result<WeeklyOutcome> {
        let sync = self
            .run_sync(WEEKLY_PROFILE)
            .await
            .context("weekly sync")?;
        let import = match &self.config.crm_export {
            Some(_) => Some(self.import_csv().await.context("weekly import")?.metadata),
            None => {
                info!("no CRM export configured; skipping import");
                None
            }
        };
        Ok(WeeklyOutcome { sync, import })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture_pipeline(root: &Path) -> SyncPipeline {
        let api = FixtureApi::new().with_conversation_pages(vec![vec![
            json!({"id": "a", "transcription": "T-a", "duration": 90}),
        ]]);
        let mut profiles = ProfileSet::builtin();
        profiles
            .merge_yaml("profiles:\n  batch:\n    mode: unlimited\n    max_records_to_scan: 100\n    api_delay_ms: 0\n")
            .expect("yaml");
        SyncPipeline::new(SyncConfig::rooted_at(root), Arc::new(api), None, profiles)
    }

    #[tokio::test]
    async fn weekly_run_syncs_and_skips_import_without_export() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = fixture_pipeline(dir.path());

        let outcome = pipeline.run_weekly().await.expect("weekly");
        assert_eq!(outcome.sync.processed, 1);
        assert!(outcome.import.is_none());
        assert_eq!(pipeline.history(5).expect("history").runs.len(), 1);
    }

    #[tokio::test]
    async fn drive_jobs_require_a_configured_drive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = fixture_pipeline(dir.path());
        assert!(pipeline.drive_reset().await.is_err());
        assert!(pipeline.import_csv().await.is_err());
    }

    #[tokio::test]
    async fn missing_api_key_only_blocks_api_jobs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline =
            SyncPipeline::from_config(SyncConfig::rooted_at(dir.path()), None).expect("pipeline");
        assert!(pipeline.run_sync("test").await.is_err());
        assert!(pipeline.analyze().await.is_err());
        assert_eq!(pipeline.verify().await.expect("verify").total_files, 0);
        assert!(pipeline.history(5).expect("history").runs.is_empty());
    }
}
