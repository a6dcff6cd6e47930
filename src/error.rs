//
// error.rs
// Dicom-Trolley-Tool-rs
//
// Error taxonomy shared by the channel registry, persistence, field validation and output formatting.
//
// Thales Matheus Mendonça Santos - October 2026

use thiserror::Error;

use crate::client::DicomClientError;
use crate::output::FormatLevel;

pub type Result<T> = std::result::Result<T, TrolleyToolError>;

#[derive(Debug, Error)]
pub enum TrolleyToolError {
    #[error("Unknown channel class key '{key}'. Available: {available:?}")]
    UnknownDiscriminator {
        key: String,
        available: Vec<&'static str>,
    },
    #[error("No class key registered for channel type '{0}'")]
    UnknownVariant(String),
    #[error("Could not find key '{key}' in {backend}")]
    NotFound { key: String, backend: String },
    #[error("Key \"{0}\" is already taken")]
    ReservedKeyCollision(String),
    #[error("Stored record for '{key}' is invalid: {reason}")]
    InvalidRecord { key: String, reason: String },
    #[error("Channel '{key}' ({class_key}) cannot be used as a {role}")]
    UnsupportedRole {
        key: String,
        class_key: &'static str,
        role: &'static str,
    },
    #[error(
        "To display properly, studies should have consistent object levels \
         (whether they contain series and/or image information). Found {0:?}"
    )]
    InconsistentLevel(Vec<FormatLevel>),
    #[error("{0} was empty. Cannot guess format level")]
    EmptyInput(&'static str),
    #[error("{0}")]
    InvalidFieldName(String),
    #[error("{0} is not implemented")]
    NotImplemented(String),
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Client(#[from] DicomClientError),
}
