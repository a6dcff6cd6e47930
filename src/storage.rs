//
// storage.rs
// Dicom-Trolley-Tool-rs
//
// Writes downloaded DICOM objects below an output directory, one folder per study and series, with path
// sanitization and a content-hash fallback name.
//
// Thales Matheus Mendonça Santos - October 2026

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dicom::dictionary_std::tags;
use dicom::object::{from_reader, DefaultDicomObject};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::dicom_access::ElementAccess;

const PREAMBLE_LEN: usize = 128;

#[derive(Clone)]
pub struct DownloadStore {
    root: PathBuf,
}

impl DownloadStore {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        // Create the output directory eagerly so a bad path fails before any request.
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist one Part 10 object. Returns the path written.
    pub fn save_object(&self, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = match parse_uids(bytes) {
            Some((study, series, instance)) => {
                let dir = self
                    .root
                    .join(sanitize_uid(&study))
                    .join(sanitize_uid(&series));
                fs::create_dir_all(&dir)?;
                dir.join(sanitize_uid(&instance))
            }
            None => {
                warn!("Downloaded object without readable UIDs, storing by content hash");
                let hash = hex::encode(Sha256::digest(bytes));
                self.root.join(format!("dicom-{}.dcm", &hash[..12]))
            }
        };
        fs::write(&path, bytes)?;
        debug!("Wrote {} bytes to {:?}", bytes.len(), path);
        Ok(path)
    }
}

fn parse_uids(bytes: &[u8]) -> Option<(String, String, String)> {
    // from_reader expects the stream to start at the DICM magic.
    let start = if bytes.len() > PREAMBLE_LEN + 4 && &bytes[PREAMBLE_LEN..PREAMBLE_LEN + 4] == b"DICM" {
        PREAMBLE_LEN
    } else {
        0
    };
    let obj: DefaultDicomObject = from_reader(&bytes[start..]).ok()?;
    Some((
        obj.element_str(tags::STUDY_INSTANCE_UID)?,
        obj.element_str(tags::SERIES_INSTANCE_UID)?,
        obj.element_str(tags::SOP_INSTANCE_UID)?,
    ))
}

fn sanitize_uid(input: &str) -> String {
    // UIDs are digits and dots; anything else would be a path surprise.
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-' || *c == '_')
        .collect();
    match cleaned.trim_matches('.') {
        "" => "unknown".to_string(),
        trimmed => trimmed.to_string(),
    }
}
