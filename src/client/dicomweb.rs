//
// dicomweb.rs
// Dicom-Trolley-Tool-rs
//
// DICOMweb client: QIDO-RS searches returning DICOM JSON and WADO-RS multipart retrieval.
//
// Thales Matheus Mendonça Santos - October 2026

use std::path::{Path, PathBuf};

use dicom::object::{InMemDicomObject, StandardDataDictionary};
use dicom_json::from_value;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info};

use super::multipart::{boundary_from_content_type, split_parts};
use super::tree::assemble_studies;
use super::{ClientResult, DicomClientError, Downloader, Query, QueryLevel, Searcher, Study};
use crate::storage::DownloadStore;

const DICOM_JSON: &str = "application/dicom+json";
const MULTIPART_DICOM: &str = "multipart/related; type=\"application/dicom\"; transfer-syntax=*";

pub struct DicomWeb {
    session: Client,
    qido_url: String,
    wado_url: String,
}

impl DicomWeb {
    pub fn new(session: Client, qido_url: impl Into<String>, wado_url: impl Into<String>) -> Self {
        Self {
            session,
            qido_url: qido_url.into().trim_end_matches('/').to_string(),
            wado_url: wado_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// QIDO-RS resource and parameters for a query.
    pub fn qido_request(&self, query: &Query) -> (String, Vec<(String, String)>) {
        let resource = match query.query_level {
            QueryLevel::Study => "studies",
            QueryLevel::Series => "series",
            QueryLevel::Instance => "instances",
        };
        let mut params: Vec<(String, String)> = query
            .search_keys()
            .into_iter()
            .map(|(keyword, value)| (keyword.to_string(), value.to_string()))
            .collect();

        let mut include = vec!["StudyInstanceUID".to_string()];
        if query.query_level != QueryLevel::Study {
            include.push("SeriesInstanceUID".to_string());
        }
        include.extend(query.include_fields.iter().cloned());
        params.extend(include.into_iter().map(|field| ("includefield".to_string(), field)));

        (format!("{}/{}", self.qido_url, resource), params)
    }

    fn retrieve(&self, url: &str, store: &DownloadStore) -> ClientResult<Vec<PathBuf>> {
        debug!("WADO-RS GET {}", url);
        let response = self
            .session
            .get(url)
            .header(ACCEPT, MULTIPART_DICOM)
            .send()?
            .error_for_status()?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes()?;

        let boundary = boundary_from_content_type(&content_type).ok_or_else(|| {
            DicomClientError::InvalidResponse(format!(
                "expected multipart WADO-RS response, got '{content_type}'"
            ))
        })?;
        split_parts(&body, &boundary)?
            .into_iter()
            .filter(|part| !part.is_xml())
            .map(|part| -> ClientResult<PathBuf> { Ok(store.save_object(&part.body)?) })
            .collect()
    }
}

/// Parse a QIDO-RS response body (a JSON array of DICOM JSON objects).
pub fn parse_qido_response(body: &str) -> ClientResult<Vec<InMemDicomObject>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let json: Value = serde_json::from_str(body)
        .map_err(|e| DicomClientError::InvalidResponse(format!("QIDO-RS json: {e}")))?;
    let Value::Array(items) = json else {
        return Err(DicomClientError::InvalidResponse(
            "QIDO-RS response is not a JSON array".into(),
        ));
    };
    items
        .into_iter()
        .map(|item| {
            let obj: InMemDicomObject<StandardDataDictionary> = from_value(item)
                .map_err(|e| DicomClientError::InvalidResponse(format!("DICOM JSON: {e}")))?;
            Ok(obj)
        })
        .collect()
}

impl Searcher for DicomWeb {
    fn find_studies(&self, query: &Query) -> ClientResult<Vec<Study>> {
        let (url, params) = self.qido_request(query);
        debug!("QIDO-RS GET {} with {}", url, query);
        let response = self
            .session
            .get(&url)
            .header(ACCEPT, DICOM_JSON)
            .query(&params)
            .send()?
            .error_for_status()?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let objects = parse_qido_response(&response.text()?)?;
        assemble_studies(query.query_level, objects)
    }
}

impl Downloader for DicomWeb {
    fn download(&self, study: &Study, output_dir: &Path) -> ClientResult<Vec<PathBuf>> {
        let store = DownloadStore::new(output_dir)?;
        let study_url = format!("{}/studies/{}", self.wado_url, study.uid);

        if study.series.is_empty() {
            info!("WADO-RS: retrieving study {}", study.uid);
            return self.retrieve(&study_url, &store);
        }

        let mut written = Vec::new();
        for series in &study.series {
            info!("WADO-RS: retrieving series {}", series.uid);
            written.extend(self.retrieve(&format!("{study_url}/series/{}", series.uid), &store)?);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom_access::ElementAccess;
    use dicom::core::Tag;

    #[test]
    fn qido_response_parses_dicom_json() {
        let body = r#"[
            {"0020000D": {"vr": "UI", "Value": ["1.2.3"]},
             "00080050": {"vr": "SH", "Value": ["00123"]}},
            {"0020000D": {"vr": "UI", "Value": ["1.2.4"]}}
        ]"#;
        let objects = parse_qido_response(body).expect("parse");
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].element_str(Tag(0x0008, 0x0050)).as_deref(), Some("00123"));
        assert_eq!(objects[1].element_str(Tag(0x0020, 0x000D)).as_deref(), Some("1.2.4"));
    }

    #[test]
    fn empty_qido_body_means_no_matches() {
        assert!(parse_qido_response("").expect("empty").is_empty());
        assert!(parse_qido_response("{}").is_err());
    }

    #[test]
    fn series_query_goes_to_series_resource() {
        let client = DicomWeb::new(Client::new(), "http://pacs/qido/", "http://pacs/wado");
        let query = Query::by_accession_number("42")
            .with_level(QueryLevel::Series)
            .with_include_fields(vec!["Modality".into()]);
        let (url, params) = client.qido_request(&query);

        assert_eq!(url, "http://pacs/qido/series");
        assert!(params.contains(&("AccessionNumber".into(), "42".into())));
        assert!(params.contains(&("includefield".into(), "SeriesInstanceUID".into())));
        assert!(params.contains(&("includefield".into(), "Modality".into())));
    }
}
