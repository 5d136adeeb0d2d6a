use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use convarc_storage::{DriveFile, DriveTarget, LocalArchive};
use tracing::{info, warn};

pub const TEXT_MIME: &str = "text/plain";

/// Durable local store for rendered transcripts.
#[async_trait]
pub trait ArchiveWriter: Send + Sync {
    async fn write(&self, file_name: &str, content: &str) -> anyhow::Result<PathBuf>;
}

#[async_trait]
impl ArchiveWriter for LocalArchive {
    async fn write(&self, file_name: &str, content: &str) -> anyhow::Result<PathBuf> {
        LocalArchive::write(self, file_name, content).await
    }
}

#[derive(Clone)]
pub struct DriveMirror {
    pub target: Arc<dyn DriveTarget>,
    pub folder_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    Disabled,
    Uploaded(DriveFile),
    Failed(String),
}

impl MirrorOutcome {
    pub fn link(&self) -> Option<&str> {
        match self {
            Self::Uploaded(file) => file.web_view_link.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SinkReceipt {
    pub local_path: PathBuf,
    pub mirror: MirrorOutcome,
}

/// Writes each artifact locally, then mirrors it when a drive is configured.
/// Only the local write can fail the call.
#[derive(Clone)]
pub struct ArchiveSink {
    local: Arc<dyn ArchiveWriter>,
    mirror: Option<DriveMirror>,
}

impl ArchiveSink {
    pub fn new(local: Arc<dyn ArchiveWriter>) -> Self {
        Self {
            local,
            mirror: None,
        }
    }

    pub fn with_mirror(mut self, mirror: Option<DriveMirror>) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn mirror(&self) -> Option<&DriveMirror> {
        self.mirror.as_ref()
    }

    pub async fn write(&self, file_name: &str, content: &str) -> anyhow::Result<SinkReceipt> {
        let local_path = self
            .local
            .write(file_name, content)
            .await
            .with_context(|| format!("writing {file_name} to the local archive"))?;

        let mirror = match &self.mirror {
            None => MirrorOutcome::Disabled,
            Some(mirror) => match mirror
                .target
                .create_file(
                    file_name,
                    TEXT_MIME,
                    &mirror.folder_id,
                    content.as_bytes().to_vec(),
                )
                .await
            {
                Ok(file) => {
                    info!(file_name, drive_file_id = %file.id, "mirrored to drive");
                    MirrorOutcome::Uploaded(file)
                }
                Err(err) => {
                    warn!(file_name, error = %format!("{err:#}"), "drive upload failed; local copy kept");
                    MirrorOutcome::Failed(format!("{err:#}"))
                }
            },
        };

        Ok(SinkReceipt { local_path, mirror })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use anyhow::anyhow;

    use super::*;

    /// In-memory drive folder; `fail_uploads` rejects every create.
    #[derive(Default)]
    pub struct MemoryDrive {
        pub files: Mutex<BTreeMap<String, DriveFile>>,
        pub fail_uploads: bool,
    }

    #[async_trait]
    impl DriveTarget for MemoryDrive {
        async fn create_file(
            &self,
            name: &str,
            _mime_type: &str,
            _parent_folder_id: &str,
            _bytes: Vec<u8>,
        ) -> anyhow::Result<DriveFile> {
            if self.fail_uploads {
                return Err(anyhow!("drive unavailable"));
            }
            let mut files = self.files.lock().map_err(|_| anyhow!("poisoned"))?;
            let id = format!("drv-{}", files.len() + 1);
            let file = DriveFile {
                id: id.clone(),
                name: name.to_string(),
                web_view_link: Some(format!("https://drive.test/{id}")),
                created_time: None,
            };
            files.insert(id, file.clone());
            Ok(file)
        }

        async fn list_folder(&self, _folder_id: &str) -> anyhow::Result<Vec<DriveFile>> {
            let files = self.files.lock().map_err(|_| anyhow!("poisoned"))?;
            Ok(files.values().cloned().collect())
        }

        async fn delete_file(&self, file_id: &str) -> anyhow::Result<()> {
            let mut files = self.files.lock().map_err(|_| anyhow!("poisoned"))?;
            files
                .remove(file_id)
                .map(|_| ())
                .ok_or_else(|| anyhow!("no such file {file_id}"))
        }
    }
}
