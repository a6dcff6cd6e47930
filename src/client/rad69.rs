//
// rad69.rs
// Dicom-Trolley-Tool-rs
//
// IHE rad69 (RetrieveImagingDocumentSet) downloads: builds the SOAP request, streams the MTOM response and
// hands each DICOM part to the download store.
//
// Thales Matheus Mendonça Santos - October 2026

use std::io::Read;
use std::path::{Path, PathBuf};

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};
use uuid::Uuid;

use super::multipart::{boundary_from_content_type, split_parts};
use super::{ClientResult, DicomClientError, Downloader, Series, Study};
use crate::storage::DownloadStore;

pub const DEFAULT_HTTP_CHUNK_SIZE: usize = 5 * 1024 * 1024;

const REPOSITORY_UNIQUE_ID: &str = "1.3.6.1.4.1.21367.13.80.110";

const TRANSFER_SYNTAXES: &[&str] = &[
    "1.2.840.10008.1.2",
    "1.2.840.10008.1.2.1",
    "1.2.840.10008.1.2.4.57",
    "1.2.840.10008.1.2.4.70",
    "1.2.840.10008.1.2.4.90",
];

pub struct Rad69 {
    session: Client,
    url: String,
    pub http_chunk_size: usize,
    pub request_per_series: bool,
}

impl Rad69 {
    pub fn new(session: Client, url: impl Into<String>) -> Self {
        Self {
            session,
            url: url.into(),
            http_chunk_size: DEFAULT_HTTP_CHUNK_SIZE,
            request_per_series: true,
        }
    }

    fn retrieve(&self, study_uid: &str, series: &[&Series], store: &DownloadStore) -> ClientResult<Vec<PathBuf>> {
        let envelope = retrieve_request(&self.url, study_uid, series);
        let response = self
            .session
            .post(&self.url)
            .header(CONTENT_TYPE, "application/soap+xml")
            .body(envelope)
            .send()?
            .error_for_status()?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = read_in_chunks(response, self.http_chunk_size)?;

        let boundary = boundary_from_content_type(&content_type).ok_or_else(|| {
            DicomClientError::InvalidResponse(format!(
                "expected multipart rad69 response, got '{content_type}'"
            ))
        })?;
        let parts = split_parts(&body, &boundary)?;

        let mut written = Vec::new();
        let mut soap_fault = None;
        for part in parts {
            if part.is_xml() {
                soap_fault = Some(String::from_utf8_lossy(&part.body).into_owned());
                continue;
            }
            written.push(store.save_object(&part.body)?);
        }

        if written.is_empty() {
            return Err(DicomClientError::InvalidResponse(format!(
                "rad69 response for study {study_uid} contained no DICOM data: {}",
                soap_fault.unwrap_or_default()
            )));
        }
        Ok(written)
    }
}

fn read_in_chunks(mut response: impl Read, chunk_size: usize) -> ClientResult<Vec<u8>> {
    let mut body = Vec::new();
    let mut chunk = vec![0u8; chunk_size.max(1)];
    loop {
        let read = response.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
        debug!("rad69: received {} bytes so far", body.len());
    }
    Ok(body)
}

/// SOAP 1.2 envelope asking for every instance of the given series.
pub fn retrieve_request(url: &str, study_uid: &str, series: &[&Series]) -> String {
    let mut series_requests = String::new();
    for s in series {
        series_requests.push_str(&format!(
            "<iherad:SeriesRequest seriesInstanceUID=\"{}\">",
            s.uid
        ));
        for instance in &s.instances {
            series_requests.push_str(&format!(
                "<ihe:DocumentRequest><ihe:RepositoryUniqueId>{REPOSITORY_UNIQUE_ID}</ihe:RepositoryUniqueId>\
                 <ihe:DocumentUniqueId>{}</ihe:DocumentUniqueId></ihe:DocumentRequest>",
                instance.uid
            ));
        }
        series_requests.push_str("</iherad:SeriesRequest>");
    }

    let transfer_syntaxes: String = TRANSFER_SYNTAXES
        .iter()
        .map(|ts| format!("<iherad:TransferSyntaxUID>{ts}</iherad:TransferSyntaxUID>"))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://www.w3.org/2005/08/addressing">
<s:Header>
<a:Action s:mustUnderstand="1">urn:ihe:rad:2009:RetrieveImagingDocumentSet</a:Action>
<a:MessageID>urn:uuid:{message_id}</a:MessageID>
<a:ReplyTo s:mustUnderstand="1"><a:Address>http://www.w3.org/2005/08/addressing/anonymous</a:Address></a:ReplyTo>
<a:To s:mustUnderstand="1">{url}</a:To>
</s:Header>
<s:Body>
<iherad:RetrieveImagingDocumentSetRequest xmlns:iherad="urn:ihe:rad:xdsi-b:2009" xmlns:ihe="urn:ihe:iti:xds-b:2007">
<iherad:StudyRequest studyInstanceUID="{study_uid}">{series_requests}</iherad:StudyRequest>
<iherad:TransferSyntaxUIDList>{transfer_syntaxes}</iherad:TransferSyntaxUIDList>
</iherad:RetrieveImagingDocumentSetRequest>
</s:Body>
</s:Envelope>"#,
        message_id = Uuid::new_v4(),
    )
}

impl Downloader for Rad69 {
    fn download(&self, study: &Study, output_dir: &Path) -> ClientResult<Vec<PathBuf>> {
        let store = DownloadStore::new(output_dir)?;
        let series: Vec<&Series> = study.series.iter().collect();
        if series.is_empty() {
            return Err(DicomClientError::InvalidResponse(format!(
                "study {} has no series information, cannot request it over rad69",
                study.uid
            )));
        }

        let mut written = Vec::new();
        if self.request_per_series {
            for s in &series {
                info!("rad69: requesting series {}", s.uid);
                written.extend(self.retrieve(&study.uid, &[*s], &store)?);
            }
        } else {
            info!("rad69: requesting study {} in one request", study.uid);
            written.extend(self.retrieve(&study.uid, &series, &store)?);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Instance;
    use dicom::object::InMemDicomObject;

    #[test]
    fn request_lists_every_instance() {
        let series = Series {
            uid: "1.2.3.4".into(),
            data: InMemDicomObject::new_empty(),
            instances: vec![
                Instance {
                    uid: "1.2.3.4.1".into(),
                    data: InMemDicomObject::new_empty(),
                },
                Instance {
                    uid: "1.2.3.4.2".into(),
                    data: InMemDicomObject::new_empty(),
                },
            ],
        };
        let xml = retrieve_request("http://server/rad69", "1.2.3", &[&series]);

        assert!(xml.contains(r#"studyInstanceUID="1.2.3""#));
        assert!(xml.contains(r#"seriesInstanceUID="1.2.3.4""#));
        assert!(xml.contains("<ihe:DocumentUniqueId>1.2.3.4.1</ihe:DocumentUniqueId>"));
        assert!(xml.contains("<ihe:DocumentUniqueId>1.2.3.4.2</ihe:DocumentUniqueId>"));
        assert!(xml.contains("<a:To s:mustUnderstand=\"1\">http://server/rad69</a:To>"));
    }

    #[test]
    fn chunked_read_collects_everything() {
        let data: Vec<u8> = (0..=255).collect();
        let body = read_in_chunks(&data[..], 7).expect("read");
        assert_eq!(body, data);
    }
}
