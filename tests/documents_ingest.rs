use std::sync::Arc;

use anyhow::Result;
use docketflow::documents::{Documents, UploadFile, MAX_DOCUMENT_BYTES};
use docketflow::testing::MemoryObjectStore;
use docketflow::Error;

const CITATION_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<jsi:CitationDocument
    xmlns:jsi="http://www.justicesystems.com/iepd"
    xmlns:j="http://niem.gov/niem/domains/jxdm/4.0"
    xmlns:nc="http://niem.gov/niem/niem-core/2.0">
  <j:Citation>
    <nc:IdentificationID>TR-2024-0042</nc:IdentificationID>
    <nc:Date>2024-01-15</nc:Date>
  </j:Citation>
  <nc:Person>
    <nc:PersonName>
      <nc:PersonGivenName>Jordan</nc:PersonGivenName>
      <nc:PersonSurName>Reyes</nc:PersonSurName>
    </nc:PersonName>
    <nc:PersonSSNIdentification>
      <nc:IdentificationID>123-45-6789</nc:IdentificationID>
    </nc:PersonSSNIdentification>
  </nc:Person>
  <j:ChargeStatute>
    <j:StatuteCodeIdentification><nc:IdentificationID>625-5/11-601</nc:IdentificationID></j:StatuteCodeIdentification>
    <j:StatuteDescriptionText>Speeding</j:StatuteDescriptionText>
  </j:ChargeStatute>
</jsi:CitationDocument>"#;

fn upload(filename: &str, content: impl Into<Vec<u8>>) -> UploadFile {
    UploadFile {
        filename: filename.into(),
        content: content.into(),
    }
}

#[tokio::test]
async fn ingest_lists_and_parses_citation_documents() -> Result<()> {
    let client = Arc::new(MemoryObjectStore::new());
    let docs = Documents::new(client.clone(), "metro");

    // an empty batch is reported unsuccessful without failing files
    let report = docs.ingest_batch("officer", "2024-01-15", vec![]).await?;
    assert!(!report.success);
    assert!(report.failed_files.is_empty());

    let report = docs
        .ingest_batch(
            "officer",
            "2024-01-15",
            vec![upload("citation-42.xml", CITATION_XML)],
        )
        .await?;
    assert!(report.success);
    assert!(report.failed_files.is_empty());
    assert_eq!(client.object_count(), 1);

    // the stored key follows the tenant-prefixed layout, named by case number
    let links = docs.list_documents(Some("2024-01-15")).await?;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].key, "metro/Case/XML/2024-01-15/TR-2024-0042.xml");
    assert_eq!(links[0].data_type, "document");
    assert!(links[0].data.contains("expires=300"));
    assert_eq!(
        links[0].meta.get("case_number").map(String::as_str),
        Some("TR-2024-0042")
    );
    assert_eq!(
        links[0].meta.get("created_by").map(String::as_str),
        Some("officer")
    );
    assert_eq!(
        links[0].meta.get("filename").map(String::as_str),
        Some("TR-2024-0042.xml")
    );

    assert_eq!(docs.list_documents(Some("2099-01-01")).await?.len(), 0);
    assert_eq!(docs.list_documents(None).await?.len(), 1);

    // round-trip the stored document back into structured fields
    let extract = docs.parse_citation(&links[0].key).await?;
    assert_eq!(extract.citation.case_number, "TR-2024-0042");
    assert_eq!(extract.defendant.last_name, "Reyes");
    assert_eq!(extract.charges.len(), 1);

    // a bad extension aborts the whole batch up front
    let err = docs
        .ingest_batch(
            "officer",
            "2024-01-15",
            vec![
                upload("citation-43.xml", CITATION_XML),
                upload("notes.pdf", "not xml"),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(client.object_count(), 1, "nothing stored from aborted batch");

    // per-file failures accumulate instead of aborting the batch
    let oversized = vec![b'x'; MAX_DOCUMENT_BYTES + 1];
    let report = docs
        .ingest_batch(
            "officer",
            "2024-01-16",
            vec![
                upload("too-big.xml", oversized),
                upload("garbled.xml", "<unclosed"),
                upload("citation-44.xml", CITATION_XML.replace("TR-2024-0042", "TR-2024-0044")),
            ],
        )
        .await?;
    assert!(!report.success);
    assert_eq!(report.failed_files, vec!["too-big", "garbled"]);
    assert_eq!(client.object_count(), 2);

    let day_two = docs.list_documents(Some("2024-01-16")).await?;
    assert_eq!(day_two.len(), 1);
    assert_eq!(day_two[0].key, "metro/Case/XML/2024-01-16/TR-2024-0044.xml");

    Ok(())
}
