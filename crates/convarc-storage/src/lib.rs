//! Durable local state and outbound storage for the archive: the retrying
//! HTTP client, the local transcript folder, progress files, the CRM mapping
//! log, and the drive mirror.

mod archive;
mod drive;
mod http;
mod mapping;
mod progress;

pub use archive::{write_atomic, LocalArchive};
pub use drive::{
    multipart_related_body, DriveAuth, DriveFile, DriveTarget, GoogleDriveClient,
    DRIVE_API_BASE, DRIVE_UPLOAD_BASE, OAUTH_TOKEN_URL,
};
pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use mapping::MappingLog;
pub use progress::{upgrade_legacy, LegacyProgressFile, ProgressFile, ProgressStore, ResetOutcome};

