//
// channels.rs
// Dicom-Trolley-Tool-rs
//
// Credential-bearing channels to DICOM servers, the class-key registry that maps them to strings, and the
// conversion to and from the flat records kept in the secret store.
//
// Thales Matheus Mendonça Santos - October 2026

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::debug;

use crate::client::dicom_qr::DicomQr;
use crate::client::dicomweb::DicomWeb;
use crate::client::mint::Mint;
use crate::client::rad69::Rad69;
use crate::client::session::{create_session, LoginDetails};
use crate::client::{Downloader, Searcher};
use crate::error::{Result, TrolleyToolError};

const MASK: &str = "**********";

/// A credential value. Shown masked in Debug and in serialized output; the plain text is only
/// available through [`Secret::expose_secret`].
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({MASK})")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(MASK)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

/// Searches with MINT behind a form login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MintChannel {
    pub key: String,
    #[serde(default)]
    pub description: String,
    pub login_url: String,
    pub mint_url: String,
    pub user: String,
    pub password: Secret,
    pub realm: String,
}

/// Downloads with IHE rad69 behind a form login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rad69Channel {
    pub key: String,
    #[serde(default)]
    pub description: String,
    pub login_url: String,
    pub rad69_url: String,
    pub user: String,
    pub password: Secret,
    pub realm: String,
}

/// Searches with DICOM Query/Retrieve (C-FIND).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DicomQrChannel {
    pub key: String,
    #[serde(default)]
    pub description: String,
    pub host: String,
    pub port: String,
    pub aet: Secret,
    pub aec: Secret,
}

/// Searches with QIDO-RS and downloads with WADO-RS. An empty `login_url` skips the login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DicomWebChannel {
    pub key: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub login_url: String,
    pub qido_url: String,
    pub wado_url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: Secret,
    #[serde(default)]
    pub realm: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Channel {
    Mint(MintChannel),
    Rad69(Rad69Channel),
    DicomQr(DicomQrChannel),
    DicomWeb(DicomWebChannel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Mint,
    Rad69,
    DicomQr,
    DicomWeb,
}

/// Class keys stored alongside channel records. Must stay one-to-one.
pub const CHANNEL_CLASSES: &[(&str, ChannelKind)] = &[
    ("rad69", ChannelKind::Rad69),
    ("mint", ChannelKind::Mint),
    ("dicomqr", ChannelKind::DicomQr),
    ("dicomweb", ChannelKind::DicomWeb),
];

/// Tuning passed to downloaders, taken from the settings file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadOptions {
    pub http_chunk_size: Option<usize>,
    pub request_per_series: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            http_chunk_size: None,
            request_per_series: true,
        }
    }
}

fn record_from<T: DeserializeOwned>(record: Map<String, Value>) -> serde_json::Result<T> {
    serde_json::from_value(Value::Object(record))
}

impl ChannelKind {
    /// Rebuild a channel of this kind from a flat record (class key already removed).
    pub fn build(self, record: Map<String, Value>) -> serde_json::Result<Channel> {
        Ok(match self {
            ChannelKind::Mint => Channel::Mint(record_from(record)?),
            ChannelKind::Rad69 => Channel::Rad69(record_from(record)?),
            ChannelKind::DicomQr => Channel::DicomQr(record_from(record)?),
            ChannelKind::DicomWeb => Channel::DicomWeb(record_from(record)?),
        })
    }
}

/// Maps channel kinds to class keys and back.
pub struct ChannelFactory;

impl ChannelFactory {
    pub fn available() -> Vec<&'static str> {
        CHANNEL_CLASSES.iter().map(|(key, _)| *key).collect()
    }

    pub fn class_key_for_kind(kind: ChannelKind) -> Result<&'static str> {
        CHANNEL_CLASSES
            .iter()
            .find(|(_, k)| *k == kind)
            .map(|(key, _)| *key)
            .ok_or_else(|| TrolleyToolError::UnknownVariant(format!("{kind:?}")))
    }

    /// Key corresponding to the channel's type.
    pub fn class_key(channel: &Channel) -> Result<&'static str> {
        Self::class_key_for_kind(channel.kind())
    }

    pub fn channel_kind(class_key: &str) -> Result<ChannelKind> {
        CHANNEL_CLASSES
            .iter()
            .find(|(key, _)| *key == class_key)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| TrolleyToolError::UnknownDiscriminator {
                key: class_key.to_string(),
                available: Self::available(),
            })
    }
}

impl Channel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Mint(_) => ChannelKind::Mint,
            Channel::Rad69(_) => ChannelKind::Rad69,
            Channel::DicomQr(_) => ChannelKind::DicomQr,
            Channel::DicomWeb(_) => ChannelKind::DicomWeb,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Channel::Mint(c) => &c.key,
            Channel::Rad69(c) => &c.key,
            Channel::DicomQr(c) => &c.key,
            Channel::DicomWeb(c) => &c.key,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Channel::Mint(c) => &c.description,
            Channel::Rad69(c) => &c.description,
            Channel::DicomQr(c) => &c.description,
            Channel::DicomWeb(c) => &c.description,
        }
    }

    /// The fields holding credentials, by field name.
    pub fn secret_fields(&self) -> Vec<(&'static str, &Secret)> {
        match self {
            Channel::Mint(c) => vec![("password", &c.password)],
            Channel::Rad69(c) => vec![("password", &c.password)],
            Channel::DicomQr(c) => vec![("aet", &c.aet), ("aec", &c.aec)],
            Channel::DicomWeb(c) => vec![("password", &c.password)],
        }
    }

    /// All fields with secrets masked. Safe to print.
    pub fn masked_record(&self) -> Result<Map<String, Value>> {
        let value = match self {
            Channel::Mint(c) => serde_json::to_value(c)?,
            Channel::Rad69(c) => serde_json::to_value(c)?,
            Channel::DicomQr(c) => serde_json::to_value(c)?,
            Channel::DicomWeb(c) => serde_json::to_value(c)?,
        };
        match value {
            Value::Object(map) => Ok(map),
            other => Err(TrolleyToolError::InvalidRecord {
                key: self.key().to_string(),
                reason: format!("serialized to {other} instead of an object"),
            }),
        }
    }

    /// All fields including plain text secrets, for persistence.
    pub fn to_record(&self) -> Result<Map<String, Value>> {
        let mut record = self.masked_record()?;
        // Replace the masked values, never store the mask itself.
        for (name, secret) in self.secret_fields() {
            record.insert(name.to_string(), Value::String(secret.expose_secret().to_string()));
        }
        Ok(record)
    }

    pub fn can_search(&self) -> bool {
        !matches!(self, Channel::Rad69(_))
    }

    pub fn can_download(&self) -> bool {
        matches!(self, Channel::Rad69(_) | Channel::DicomWeb(_))
    }

    fn unsupported(&self, role: &'static str) -> TrolleyToolError {
        TrolleyToolError::UnsupportedRole {
            key: self.key().to_string(),
            class_key: ChannelFactory::class_key(self).unwrap_or("unknown"),
            role,
        }
    }

    /// Create a searcher from this channel. Logs in where the protocol needs it.
    pub fn init_searcher(&self) -> Result<Box<dyn Searcher>> {
        debug!("Initialising searcher from channel '{}'", self.key());
        match self {
            Channel::Mint(c) => {
                let session = create_session(&LoginDetails {
                    login_url: &c.login_url,
                    user: &c.user,
                    password: c.password.expose_secret(),
                    realm: &c.realm,
                })?;
                Ok(Box::new(Mint::new(session, &c.mint_url)))
            }
            Channel::DicomQr(c) => {
                let port = c.port.trim().parse::<u16>().map_err(|_| TrolleyToolError::InvalidRecord {
                    key: c.key.clone(),
                    reason: format!("port '{}' is not a valid port number", c.port),
                })?;
                Ok(Box::new(DicomQr::new(
                    &c.host,
                    port,
                    c.aet.expose_secret(),
                    c.aec.expose_secret(),
                )))
            }
            Channel::DicomWeb(c) => Ok(Box::new(dicomweb_client(c)?)),
            Channel::Rad69(_) => Err(self.unsupported("searcher")),
        }
    }

    /// Create a downloader from this channel.
    pub fn init_downloader(&self, options: &DownloadOptions) -> Result<Box<dyn Downloader>> {
        debug!("Initialising downloader from channel '{}'", self.key());
        match self {
            Channel::Rad69(c) => {
                let session = create_session(&LoginDetails {
                    login_url: &c.login_url,
                    user: &c.user,
                    password: c.password.expose_secret(),
                    realm: &c.realm,
                })?;
                let mut rad69 = Rad69::new(session, &c.rad69_url);
                if let Some(chunk_size) = options.http_chunk_size {
                    rad69.http_chunk_size = chunk_size;
                }
                rad69.request_per_series = options.request_per_series;
                Ok(Box::new(rad69))
            }
            Channel::DicomWeb(c) => Ok(Box::new(dicomweb_client(c)?)),
            Channel::Mint(_) | Channel::DicomQr(_) => Err(self.unsupported("downloader")),
        }
    }
}

fn dicomweb_client(c: &DicomWebChannel) -> Result<DicomWeb> {
    let session = create_session(&LoginDetails {
        login_url: &c.login_url,
        user: &c.user,
        password: c.password.expose_secret(),
        realm: &c.realm,
    })?;
    Ok(DicomWeb::new(session, &c.qido_url, &c.wado_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a_dicomqr_channel() -> Channel {
        Channel::DicomQr(DicomQrChannel {
            key: "qr".into(),
            description: "local PACS".into(),
            host: "localhost".into(),
            port: "11112".into(),
            aet: "MYAE".into(),
            aec: "PACS".into(),
        })
    }

    #[test]
    fn every_class_key_round_trips() {
        for (key, kind) in CHANNEL_CLASSES {
            let resolved = ChannelFactory::channel_kind(key).expect("registered");
            assert_eq!(resolved, *kind);
            assert_eq!(ChannelFactory::class_key_for_kind(resolved).expect("key"), *key);
        }
    }

    #[test]
    fn registry_is_one_to_one() {
        for (i, (key_a, kind_a)) in CHANNEL_CLASSES.iter().enumerate() {
            for (key_b, kind_b) in &CHANNEL_CLASSES[i + 1..] {
                assert_ne!(key_a, key_b);
                assert_ne!(kind_a, kind_b);
            }
        }
    }

    #[test]
    fn unknown_class_key_is_an_error() {
        let err = ChannelFactory::channel_kind("wado-uri").unwrap_err();
        assert!(matches!(err, TrolleyToolError::UnknownDiscriminator { .. }));
    }

    #[test]
    fn secrets_are_masked_except_in_records() {
        let channel = a_dicomqr_channel();
        assert!(!format!("{channel:?}").contains("MYAE"));

        let masked = channel.masked_record().expect("masked");
        assert_eq!(masked["aet"], MASK);
        assert_eq!(masked["host"], "localhost");

        let record = channel.to_record().expect("record");
        assert_eq!(record["aet"], "MYAE");
        assert_eq!(record["aec"], "PACS");
    }

    #[test]
    fn record_rebuilds_the_same_channel() {
        let channel = a_dicomqr_channel();
        let rebuilt = ChannelKind::DicomQr
            .build(channel.to_record().expect("record"))
            .expect("build");
        assert_eq!(rebuilt, channel);
    }

    #[test]
    fn misspelled_field_is_rejected() {
        let mut record = Map::new();
        for (k, v) in [
            ("key", "web"),
            ("qido_url", "https://pacs/qido"),
            ("wado_url", "https://pacs/wado"),
            ("usr", "me"),
        ] {
            record.insert(k.to_string(), Value::String(v.to_string()));
        }
        let err = ChannelKind::DicomWeb.build(record).expect_err("typo");
        assert!(err.to_string().contains("usr"), "{err}");
    }

    #[test]
    fn roles_follow_protocol() {
        let qr = a_dicomqr_channel();
        assert!(qr.can_search());
        assert!(!qr.can_download());
        let err = qr.init_downloader(&DownloadOptions::default()).err().expect("no downloader");
        assert!(matches!(err, TrolleyToolError::UnsupportedRole { role: "downloader", .. }));
    }

    #[test]
    fn bad_port_is_reported() {
        let Channel::DicomQr(mut inner) = a_dicomqr_channel() else {
            unreachable!()
        };
        inner.port = "eleven".into();
        let err = Channel::DicomQr(inner).init_searcher().err().expect("bad port");
        assert!(matches!(err, TrolleyToolError::InvalidRecord { .. }));
    }
}
