//
// mod.rs
// Dicom-Trolley-Tool-rs
//
// Protocol-neutral DICOM client surface: queries, the study/series/instance tree, and the
// Searcher/Downloader seams the concrete protocol clients plug into.
//
// Thales Matheus Mendonça Santos - October 2026

pub mod dicom_qr;
pub mod dicomweb;
pub mod mint;
pub mod multipart;
pub mod rad69;
pub mod session;
pub mod tree;

use std::fmt;
use std::path::{Path, PathBuf};

use dicom::object::InMemDicomObject;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while talking to a DICOM server. Query orchestration catches these per query.
#[derive(Debug, Error)]
pub enum DicomClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("DICOM association failed: {0}")]
    Association(String),
    #[error("Server returned DICOM status {0:#06X}")]
    Status(u16),
    #[error("Could not parse server response: {0}")]
    InvalidResponse(String),
    #[error("No results found for query '{0}'")]
    NoResults(String),
    #[error("Expected exactly one study for query '{query}' but found {count}")]
    MultipleResults { query: String, count: usize },
    #[error("Login to '{url}' failed: {reason}")]
    Login { url: String, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ClientResult<T> = std::result::Result<T, DicomClientError>;

/// How deep a query should go into the study tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryLevel {
    #[default]
    Study,
    Series,
    Instance,
}

impl QueryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryLevel::Study => "STUDY",
            QueryLevel::Series => "SERIES",
            QueryLevel::Instance => "INSTANCE",
        }
    }
}

impl fmt::Display for QueryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A search for studies. Unset keys are not sent to the server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub query_level: QueryLevel,
    pub study_instance_uid: Option<String>,
    pub accession_number: Option<String>,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub modalities_in_study: Option<String>,
    /// Extra DICOM keywords the server should return.
    pub include_fields: Vec<String>,
}

impl Query {
    pub fn by_study_uid(uid: impl Into<String>) -> Self {
        Self {
            study_instance_uid: Some(uid.into()),
            ..Self::default()
        }
    }

    pub fn by_accession_number(number: impl Into<String>) -> Self {
        Self {
            accession_number: Some(number.into()),
            ..Self::default()
        }
    }

    pub fn by_patient_id(id: impl Into<String>) -> Self {
        Self {
            patient_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: QueryLevel) -> Self {
        self.query_level = level;
        self
    }

    pub fn with_include_fields(mut self, fields: Vec<String>) -> Self {
        self.include_fields = fields;
        self
    }

    /// Search keys that have a value, as (DICOM keyword, value).
    pub fn search_keys(&self) -> Vec<(&'static str, &str)> {
        [
            ("StudyInstanceUID", &self.study_instance_uid),
            ("AccessionNumber", &self.accession_number),
            ("PatientID", &self.patient_id),
            ("PatientName", &self.patient_name),
            ("ModalitiesInStudy", &self.modalities_in_study),
        ]
        .into_iter()
        .filter_map(|(keyword, value)| value.as_deref().map(|v| (keyword, v)))
        .collect()
    }

    /// One line describing this query, used as a heading in raw output.
    pub fn short_string(&self) -> String {
        let mut parts = vec![format!("{} level", self.query_level)];
        parts.extend(
            self.search_keys()
                .into_iter()
                .map(|(keyword, value)| format!("{keyword}={value}")),
        );
        if !self.include_fields.is_empty() {
            parts.push(format!("include: {}", self.include_fields.join(",")));
        }
        parts.join(", ")
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_string())
    }
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub uid: String,
    pub data: InMemDicomObject,
}

#[derive(Debug, Clone)]
pub struct Series {
    pub uid: String,
    pub data: InMemDicomObject,
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone)]
pub struct Study {
    pub uid: String,
    pub data: InMemDicomObject,
    pub series: Vec<Series>,
}

impl Study {
    pub fn new(uid: impl Into<String>, data: InMemDicomObject) -> Self {
        Self {
            uid: uid.into(),
            data,
            series: Vec::new(),
        }
    }

    /// True when every series carries instance information, which downloaders need.
    pub fn has_instance_info(&self) -> bool {
        !self.series.is_empty() && self.series.iter().all(|s| !s.instances.is_empty())
    }

    pub fn instance_count(&self) -> usize {
        self.series.iter().map(|s| s.instances.len()).sum()
    }
}

/// Something that can answer study queries.
pub trait Searcher {
    fn find_studies(&self, query: &Query) -> ClientResult<Vec<Study>>;

    /// Exactly one study for the query, or an error.
    fn find_study(&self, query: &Query) -> ClientResult<Study> {
        let mut studies = self.find_studies(query)?;
        match studies.len() {
            0 => Err(DicomClientError::NoResults(query.short_string())),
            1 => Ok(studies.remove(0)),
            count => Err(DicomClientError::MultipleResults {
                query: query.short_string(),
                count,
            }),
        }
    }
}

/// Something that can write the objects of a study to disk.
pub trait Downloader {
    fn download(&self, study: &Study, output_dir: &Path) -> ClientResult<Vec<PathBuf>>;
}

/// Combines one searcher and one downloader.
pub struct Trolley {
    searcher: Box<dyn Searcher>,
    downloader: Box<dyn Downloader>,
    /// Re-query at instance level before downloading studies that lack it.
    pub query_missing: bool,
}

impl Trolley {
    pub fn new(searcher: Box<dyn Searcher>, downloader: Box<dyn Downloader>) -> Self {
        Self {
            searcher,
            downloader,
            query_missing: true,
        }
    }

    pub fn download(&self, study: &Study, output_dir: &Path) -> ClientResult<Vec<PathBuf>> {
        let written = if self.query_missing && !study.has_instance_info() {
            debug!("Study {} lacks instance info, querying for it", study.uid);
            let query = Query::by_study_uid(&study.uid).with_level(QueryLevel::Instance);
            let full = self.searcher.find_study(&query)?;
            self.downloader.download(&full, output_dir)?
        } else {
            self.downloader.download(study, output_dir)?
        };
        info!(
            "Downloaded {} object(s) for study {} to {:?}",
            written.len(),
            study.uid,
            output_dir
        );
        Ok(written)
    }
}

impl Searcher for Trolley {
    fn find_studies(&self, query: &Query) -> ClientResult<Vec<Study>> {
        self.searcher.find_studies(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    struct FixedSearcher {
        studies: Vec<Study>,
    }

    impl Searcher for FixedSearcher {
        fn find_studies(&self, _query: &Query) -> ClientResult<Vec<Study>> {
            Ok(self.studies.clone())
        }
    }

    struct CountingDownloader;

    impl Downloader for CountingDownloader {
        fn download(&self, study: &Study, output_dir: &Path) -> ClientResult<Vec<PathBuf>> {
            Ok((0..study.instance_count())
                .map(|i| output_dir.join(i.to_string()))
                .collect())
        }
    }

    fn study_with_instances(uid: &str, instances: usize) -> Study {
        let mut study = Study::new(uid, InMemDicomObject::new_empty());
        study.series.push(Series {
            uid: format!("{uid}.1"),
            data: InMemDicomObject::new_empty(),
            instances: (0..instances)
                .map(|i| Instance {
                    uid: format!("{uid}.1.{i}"),
                    data: InMemDicomObject::new_empty(),
                })
                .collect(),
        });
        study
    }

    #[test]
    fn find_study_requires_exactly_one_result() {
        let none = FixedSearcher {
            studies: vec![],
        };
        assert!(matches!(
            none.find_study(&Query::by_study_uid("1")),
            Err(DicomClientError::NoResults(_))
        ));

        let two = FixedSearcher {
            studies: vec![study_with_instances("1", 0), study_with_instances("2", 0)],
        };
        assert!(matches!(
            two.find_study(&Query::by_study_uid("1")),
            Err(DicomClientError::MultipleResults { count: 2, .. })
        ));
    }

    #[test]
    fn short_string_lists_only_set_keys() {
        let query = Query::by_accession_number("00123").with_level(QueryLevel::Series);
        assert_eq!(query.short_string(), "SERIES level, AccessionNumber=00123");
    }

    #[test]
    fn trolley_queries_missing_instances_before_download() {
        let searcher = FixedSearcher {
            studies: vec![study_with_instances("1.2.3", 3)],
        };
        let trolley = Trolley::new(Box::new(searcher), Box::new(CountingDownloader));
        let shallow = Study::new("1.2.3", InMemDicomObject::new_empty());

        let written = trolley.download(&shallow, Path::new("/tmp")).expect("download");
        assert_eq!(written.len(), 3);
    }

    #[test]
    fn trolley_skips_requery_when_disabled() {
        let searcher = FixedSearcher {
            studies: vec![study_with_instances("1.2.3", 3)],
        };
        let mut trolley = Trolley::new(Box::new(searcher), Box::new(CountingDownloader));
        trolley.query_missing = false;
        let shallow = Study::new("1.2.3", InMemDicomObject::new_empty());

        let written = trolley.download(&shallow, Path::new("/tmp")).expect("download");
        assert!(written.is_empty());
    }
}
