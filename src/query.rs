//
// query.rs
// Dicom-Trolley-Tool-rs
//
// Runs a batch of queries one after the other, keeping failures next to successes so one bad query
// does not hide the others.
//
// Thales Matheus Mendonça Santos - October 2026

use tracing::{debug, warn};

use crate::client::{DicomClientError, Query, Searcher, Study};

/// A study found for a query.
#[derive(Debug)]
pub struct StudyResult {
    pub study: Study,
    pub query: Query,
}

/// A query that raised a client error.
#[derive(Debug)]
pub struct ErrorResult {
    pub error: DicomClientError,
    pub query: Query,
}

#[derive(Debug)]
pub enum QueryResult {
    Study(StudyResult),
    Error(ErrorResult),
}

impl QueryResult {
    pub fn is_error(&self) -> bool {
        matches!(self, QueryResult::Error(_))
    }

    pub fn query(&self) -> &Query {
        match self {
            QueryResult::Study(result) => &result.query,
            QueryResult::Error(result) => &result.query,
        }
    }
}

/// Perform each query in order. Client errors are captured per query instead of aborting the batch.
pub fn collect_query_results<S: Searcher + ?Sized>(
    searcher: &S,
    queries: Vec<Query>,
) -> Vec<QueryResult> {
    let total = queries.len();
    queries
        .into_iter()
        .enumerate()
        .map(|(idx, query)| {
            debug!("Running query {}/{}: {}", idx + 1, total, query);
            match searcher.find_study(&query) {
                Ok(study) => QueryResult::Study(StudyResult { study, query }),
                Err(error) => {
                    warn!("Query '{}' failed: {}", query, error);
                    QueryResult::Error(ErrorResult { error, query })
                }
            }
        })
        .collect()
}

/// Successes and errors, each in their original order.
pub fn split_error_results(results: &[QueryResult]) -> (Vec<&StudyResult>, Vec<&ErrorResult>) {
    let mut studies = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            QueryResult::Study(study) => studies.push(study),
            QueryResult::Error(error) => errors.push(error),
        }
    }
    (studies, errors)
}
