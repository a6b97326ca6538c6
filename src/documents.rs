use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::{citation, metrics, Error, Result};

/// Maximum accepted size for an uploaded citation document.
pub const MAX_DOCUMENT_BYTES: usize = 5_000_000;

/// Lifetime of the signed URLs handed out when listing documents.
pub const SIGNED_URL_TTL_SECS: u64 = 300;

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub key: String,
    pub size: i64,
}

/// Black-box object-storage boundary. Implementations translate their own
/// failures into [`Error::Infra`]; nothing here retries.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>>;
    async fn head(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn signed_url(&self, key: &str, expires_secs: u64) -> Result<String>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

#[derive(Clone, Debug)]
pub struct UploadFile {
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct IngestReport {
    pub success: bool,
    pub failed_files: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DocumentLink {
    /// Time-limited signed URL for the document body.
    pub data: String,
    pub meta: HashMap<String, String>,
    pub key: String,
    pub data_type: &'static str,
}

struct FileDetails {
    stem: String,
    extension: String,
}

/// Evidence-document engine over a tenant-prefixed object store.
///
/// Key layout: `<tenant-prefix>/Case/XML/<created_on>/<case_number><ext>`.
pub struct Documents {
    client: Arc<dyn ObjectStore>,
    prefix: String,
}

impl Documents {
    pub fn new(client: Arc<dyn ObjectStore>, tenant_prefix: impl Into<String>) -> Self {
        let prefix = tenant_prefix.into().trim_end_matches('/').to_string();
        Self { client, prefix }
    }

    /// Ingest a batch of citation XML uploads for one `created_on` partition.
    ///
    /// Extension checks run up front and abort the whole batch; everything
    /// after that (size cap, XML parse, store write) fails per file and is
    /// accumulated into the report instead of aborting.
    pub async fn ingest_batch(
        &self,
        actor: &str,
        created_on: &str,
        files: Vec<UploadFile>,
    ) -> Result<IngestReport> {
        if files.is_empty() {
            return Ok(IngestReport {
                success: false,
                failed_files: Vec::new(),
            });
        }

        let mut prepared = Vec::with_capacity(files.len());
        for file in files {
            let details = file_details(&file.filename)?;
            prepared.push((file, details));
        }

        let mut report = IngestReport {
            success: true,
            failed_files: Vec::new(),
        };
        for (file, details) in prepared {
            match self.store_document(actor, created_on, &file, &details).await {
                Ok(()) => metrics::record_document_upload(),
                Err(err) => {
                    tracing::warn!(
                        filename = %details.stem,
                        error = %err,
                        "citation upload failed"
                    );
                    metrics::record_document_failure();
                    report.failed_files.push(details.stem.clone());
                    report.success = false;
                }
            }
        }
        Ok(report)
    }

    async fn store_document(
        &self,
        actor: &str,
        created_on: &str,
        file: &UploadFile,
        details: &FileDetails,
    ) -> Result<()> {
        if file.content.len() > MAX_DOCUMENT_BYTES {
            return Err(Error::Validation("File too large".into()));
        }

        let case_number = citation::case_number_from_xml(&file.content)?;
        let filename = format!("{}{}", case_number, details.extension);
        let key = document_key(&self.prefix, created_on, &case_number, &details.extension);

        let metadata = HashMap::from([
            ("created_by".to_string(), actor.to_string()),
            ("filename".to_string(), filename),
            ("data_type".to_string(), "DOCUMENT".to_string()),
            ("created_on".to_string(), created_on.to_string()),
            ("case_number".to_string(), case_number),
        ]);

        self.client.put(&key, file.content.clone(), &metadata).await
    }

    /// List stored documents, newest partition first left to the caller via
    /// `created_on`; each entry carries head metadata and a signed URL.
    pub async fn list_documents(&self, created_on: Option<&str>) -> Result<Vec<DocumentLink>> {
        let mut prefix = format!("{}/Case/XML", self.prefix);
        if let Some(created_on) = created_on {
            prefix.push('/');
            prefix.push_str(created_on);
        }

        let objects = self.client.list(&prefix).await?;
        let mut links = Vec::with_capacity(objects.len());
        for object in objects {
            let name = object.key.rsplit('/').next().unwrap_or("");
            if name.is_empty() {
                // directory marker
                continue;
            }

            let mut meta = self.client.head(&object.key).await?;
            let url = self.client.signed_url(&object.key, SIGNED_URL_TTL_SECS).await?;
            meta.entry("filename".to_string())
                .or_insert_with(|| name.to_string());

            links.push(DocumentLink {
                data: url,
                meta,
                key: object.key,
                data_type: "document",
            });
        }
        Ok(links)
    }

    /// Fetch a stored citation document and extract its structured fields.
    pub async fn parse_citation(&self, key: &str) -> Result<citation::CitationExtract> {
        let body = self.client.get(key).await?;
        citation::parse(&body)
    }
}

/// Split a filename into stem and extension, rejecting anything but XML.
fn file_details(filename: &str) -> Result<FileDetails> {
    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{}", ext.to_lowercase())),
        None => (filename.to_string(), String::new()),
    };
    if extension != ".xml" {
        return Err(Error::Validation(
            "File type should be one of type xml when uploading.".into(),
        ));
    }
    Ok(FileDetails { stem, extension })
}

pub fn document_key(prefix: &str, created_on: &str, case_number: &str, extension: &str) -> String {
    format!("{prefix}/Case/XML/{created_on}/{case_number}{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_tenant_prefixed() {
        assert_eq!(
            document_key("metro", "2024-01-15", "TR-42", ".xml"),
            "metro/Case/XML/2024-01-15/TR-42.xml"
        );
    }

    #[test]
    fn only_xml_extensions_pass_validation() {
        assert!(file_details("citation.xml").is_ok());
        assert!(file_details("citation.XML").is_ok());
        assert!(file_details("citation.pdf").is_err());
        assert!(file_details("citation").is_err());
    }

    #[test]
    fn stem_excludes_extension() {
        let details = file_details("TR-42.xml").unwrap();
        assert_eq!(details.stem, "TR-42");
        assert_eq!(details.extension, ".xml");
    }
}
