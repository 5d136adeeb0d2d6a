//! Joins the transcript mapping log against a CRM export and writes the
//! import-ready CSV, an archived copy, and generation metadata.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use convarc_core::CrmMappingRow;
use convarc_storage::{write_atomic, MappingLog};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::sink::DriveMirror;

/// CRM ids compare on their case-sensitive 15-character prefix.
pub const CRM_ID_PREFIX: usize = 15;
pub const MATCHED: &str = "Matched";
pub const NOT_FOUND: &str = "Not Found";
pub const ARCHIVE_PREFIX: &str = "crm_import_";

// Column positions in the CRM contact export.
const COL_FIRST_NAME: usize = 0;
const COL_LAST_NAME: usize = 1;
const COL_ACCOUNT_NAME: usize = 3;
const COL_EMAIL: usize = 5;
const COL_CONTACT_ID: usize = 7;
const COL_ACCOUNT_ID: usize = 8;

pub fn crm_id_key(id: &str) -> String {
    id.trim().chars().take(CRM_ID_PREFIX).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmContact {
    pub name: String,
    pub email: String,
    pub account_name: String,
}

/// Contacts and accounts from the CRM export, keyed by 15-char id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrmDirectory {
    contacts: HashMap<String, CrmContact>,
    accounts: HashMap<String, String>,
}

impl CrmDirectory {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("opening CRM export {}", path.display()))?;
        Self::from_reader(reader).with_context(|| format!("parsing CRM export {}", path.display()))
    }

    pub fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let mut directory = Self::default();
        for row in reader.records() {
            let row = row?;
            let field = |index: usize| row.get(index).unwrap_or("").trim().to_string();

            let contact_id = crm_id_key(&field(COL_CONTACT_ID));
            let account_id = crm_id_key(&field(COL_ACCOUNT_ID));
            let account_name = field(COL_ACCOUNT_NAME);
            if !contact_id.is_empty() {
                let name = format!("{} {}", field(COL_FIRST_NAME), field(COL_LAST_NAME));
                directory.contacts.insert(
                    contact_id,
                    CrmContact {
                        name: name.trim().to_string(),
                        email: field(COL_EMAIL),
                        account_name: account_name.clone(),
                    },
                );
            }
            if !account_id.is_empty() && !account_name.is_empty() {
                directory.accounts.insert(account_id, account_name);
            }
        }
        Ok(directory)
    }

    pub fn contact(&self, crm_id: &str) -> Option<&CrmContact> {
        self.contacts.get(&crm_id_key(crm_id))
    }

    pub fn account_name(&self, crm_id: &str) -> Option<&str> {
        self.accounts.get(&crm_id_key(crm_id)).map(String::as_str)
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImportRow {
    #[serde(rename = "ConversationID")]
    pub conversation_id: String,
    pub filename: String,
    #[serde(rename = "PersonID")]
    pub person_id: String,
    #[serde(rename = "PersonCrmID")]
    pub person_crm_id: String,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_match_status: String,
    #[serde(rename = "AccountID")]
    pub account_id: String,
    #[serde(rename = "AccountCrmID")]
    pub account_crm_id: String,
    pub account_name: String,
    pub account_match_status: String,
    pub media_type: String,
    pub platform: String,
    pub date: String,
    pub duration: String,
    #[serde(rename = "DriveURL")]
    pub drive_url: String,
}

/// Written to `last_generation.json` after each import build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub generated_at: DateTime<Utc>,
    pub total_records: usize,
    pub contact_matches: usize,
    pub account_matches: usize,
    pub drive_urls: usize,
    pub archive_file: String,
}

pub fn join_rows(
    mapping: &[CrmMappingRow],
    directory: &CrmDirectory,
    drive_links: &HashMap<String, String>,
) -> Vec<ImportRow> {
    mapping
        .iter()
        .map(|row| {
            let person_crm_id = row.person_crm_id.clone().unwrap_or_default();
            let account_crm_id = row.account_crm_id.clone().unwrap_or_default();
            let contact = Some(person_crm_id.as_str())
                .filter(|id| !id.is_empty())
                .and_then(|id| directory.contact(id));
            let account = Some(account_crm_id.as_str())
                .filter(|id| !id.is_empty())
                .and_then(|id| directory.account_name(id));
            let status = |matched: bool| (if matched { MATCHED } else { NOT_FOUND }).to_string();

            ImportRow {
                conversation_id: row.conversation_id.clone(),
                filename: row.file_name.clone(),
                person_id: row.person_id.clone().unwrap_or_default(),
                contact_name: contact.map(|c| c.name.clone()).unwrap_or_default(),
                contact_email: contact.map(|c| c.email.clone()).unwrap_or_default(),
                contact_match_status: status(contact.is_some()),
                person_crm_id,
                account_id: row.account_id.clone().unwrap_or_default(),
                account_name: account.map(str::to_string).unwrap_or_default(),
                account_match_status: status(account.is_some()),
                account_crm_id,
                media_type: row.media_type.clone().unwrap_or_default(),
                platform: row.platform.clone().unwrap_or_default(),
                date: row.date.clone().unwrap_or_default(),
                duration: row.duration.clone().unwrap_or_default(),
                drive_url: drive_links.get(&row.file_name).cloned().unwrap_or_default(),
            }
        })
        .collect()
}

/// File name to web link for everything in the drive folder. A failed
/// listing yields no links.
pub async fn drive_links(mirror: Option<&DriveMirror>) -> HashMap<String, String> {
    let Some(mirror) = mirror else {
        return HashMap::new();
    };
    match mirror.target.list_folder(&mirror.folder_id).await {
        Ok(files) => files
            .into_iter()
            .filter_map(|file| file.web_view_link.map(|link| (file.name, link)))
            .collect(),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "could not list drive folder; continuing without links");
            HashMap::new()
        }
    }
}

pub struct ImportPaths {
    pub output: PathBuf,
    pub archive_dir: PathBuf,
    pub metadata: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub metadata: GenerationMetadata,
    pub output: PathBuf,
    pub archive_copy: PathBuf,
}

pub async fn build_import(
    mapping: &MappingLog,
    crm_export: &Path,
    mirror: Option<&DriveMirror>,
    paths: &ImportPaths,
    now: DateTime<Utc>,
) -> Result<ImportOutcome> {
    let rows = mapping.read_all().await?;
    let directory = CrmDirectory::load(crm_export)?;
    info!(
        contacts = directory.contact_count(),
        accounts = directory.account_count(),
        "loaded CRM export"
    );
    let links = drive_links(mirror).await;
    let joined = join_rows(&rows, &directory, &links);

    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in &joined {
        writer.serialize(row).context("serializing import row")?;
    }
    if joined.is_empty() {
        writer
            .write_record(IMPORT_HEADERS)
            .context("writing import header")?;
    }
    let bytes = writer.into_inner().context("finishing import CSV")?;

    let archive_file = format!("{ARCHIVE_PREFIX}{}.csv", now.format("%Y-%m-%dT%H-%M-%S"));
    let archive_copy = paths.archive_dir.join(&archive_file);
    write_atomic(&paths.output, &bytes).await?;
    write_atomic(&archive_copy, &bytes).await?;

    let metadata = GenerationMetadata {
        generated_at: now,
        total_records: joined.len(),
        contact_matches: joined.iter().filter(|r| r.contact_match_status == MATCHED).count(),
        account_matches: joined.iter().filter(|r| r.account_match_status == MATCHED).count(),
        drive_urls: joined.iter().filter(|r| !r.drive_url.is_empty()).count(),
        archive_file,
    };
    let json = serde_json::to_vec_pretty(&metadata).context("serializing generation metadata")?;
    write_atomic(&paths.metadata, &json).await?;

    info!(
        total = metadata.total_records,
        contact_matches = metadata.contact_matches,
        account_matches = metadata.account_matches,
        drive_urls = metadata.drive_urls,
        output = %paths.output.display(),
        "import CSV written"
    );
    Ok(ImportOutcome {
        metadata,
        output: paths.output.clone(),
        archive_copy,
    })
}

const IMPORT_HEADERS: [&str; 16] = [
    "ConversationID",
    "Filename",
    "PersonID",
    "PersonCrmID",
    "ContactName",
    "ContactEmail",
    "ContactMatchStatus",
    "AccountID",
    "AccountCrmID",
    "AccountName",
    "AccountMatchStatus",
    "MediaType",
    "Platform",
    "Date",
    "Duration",
    "DriveURL",
];

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use convarc_storage::DriveTarget;

    use super::*;
    use crate::sink::testing::MemoryDrive;

    const EXPORT: &str = "\
First Name,Last Name,Title,Account Name,Phone,Email,Owner,Contact ID,Account ID
Dana,Reyes,VP,Acme Corp,555,dana@acme.test,me,0035g00000AbCdE,0015g00000XyZ12AAA
";

    fn mapping_row(id: &str, person_crm: Option<&str>, account_crm: Option<&str>) -> CrmMappingRow {
        CrmMappingRow {
            conversation_id: id.into(),
            file_name: format!("transcript_video_{id}_1.txt"),
            person_id: Some("501".into()),
            person_crm_id: person_crm.map(str::to_string),
            account_id: Some("601".into()),
            account_crm_id: account_crm.map(str::to_string),
            media_type: Some("video".into()),
            platform: Some("zoom".into()),
            date: Some("2025-11-14T10:00:00Z".into()),
            duration: Some("640".into()),
        }
    }

    #[test]
    fn ids_match_on_their_fifteen_char_prefix() {
        let directory = CrmDirectory::from_reader(csv::Reader::from_reader(EXPORT.as_bytes()))
            .expect("directory");
        let rows = join_rows(
            &[
                mapping_row("c1", Some("0035g00000AbCdEAAA"), Some("0015g00000XyZ12")),
                mapping_row("c2", Some("0035g00000ZZZZZAAA"), None),
            ],
            &directory,
            &HashMap::from([("transcript_video_c1_1.txt".to_string(), "https://drive.test/1".to_string())]),
        );

        assert_eq!(rows[0].contact_name, "Dana Reyes");
        assert_eq!(rows[0].contact_email, "dana@acme.test");
        assert_eq!(rows[0].contact_match_status, MATCHED);
        assert_eq!(rows[0].account_name, "Acme Corp");
        assert_eq!(rows[0].drive_url, "https://drive.test/1");
        assert_eq!(rows[1].contact_match_status, NOT_FOUND);
        assert_eq!(rows[1].account_match_status, NOT_FOUND);
        assert!(rows[1].drive_url.is_empty());
    }

    #[tokio::test]
    async fn build_writes_output_archive_and_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let export = dir.path().join("export.csv");
        std::fs::write(&export, EXPORT).expect("export");
        let mapping = MappingLog::new(dir.path().join("mapping.csv"));
        mapping
            .append(&mapping_row("c1", Some("0035g00000AbCdEAAA"), Some("0015g00000XyZ12AAA")))
            .await
            .expect("append");

        let drive = Arc::new(MemoryDrive::default());
        drive
            .create_file("transcript_video_c1_1.txt", "text/plain", "folder", Vec::new())
            .await
            .expect("upload");
        let mirror = DriveMirror {
            target: drive,
            folder_id: "folder".into(),
        };
        let paths = ImportPaths {
            output: dir.path().join("crm_import_ready.csv"),
            archive_dir: dir.path().join("archive"),
            metadata: dir.path().join("last_generation.json"),
        };
        let now = Utc.with_ymd_and_hms(2025, 11, 15, 14, 30, 45).single().expect("ts");

        let outcome = build_import(&mapping, &export, Some(&mirror), &paths, now)
            .await
            .expect("build");
        assert_eq!(outcome.metadata.total_records, 1);
        assert_eq!(outcome.metadata.contact_matches, 1);
        assert_eq!(outcome.metadata.account_matches, 1);
        assert_eq!(outcome.metadata.drive_urls, 1);
        assert_eq!(outcome.metadata.archive_file, "crm_import_2025-11-15T14-30-45.csv");

        let written = std::fs::read_to_string(&paths.output).expect("output");
        assert!(written.starts_with(&IMPORT_HEADERS.join(",")));
        assert!(written.contains("Dana Reyes"));
        assert_eq!(
            std::fs::read_to_string(&outcome.archive_copy).expect("archive"),
            written
        );
        let metadata: GenerationMetadata =
            serde_json::from_str(&std::fs::read_to_string(&paths.metadata).expect("meta"))
                .expect("parse");
        assert_eq!(metadata, outcome.metadata);
    }
}
