//
// persistence.rs
// Dicom-Trolley-Tool-rs
//
// Settings file handling and the secret stores that channels are persisted in.
//
// Thales Matheus Mendonça Santos - October 2026

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::channels::{Channel, ChannelFactory, DownloadOptions};
use crate::client::Trolley;
use crate::error::{Result, TrolleyToolError};

pub const KEYRING_SERVICE: &str = "dicomtrolleytool";
const SETTINGS_DIR: &str = ".trolleytool";
const SETTINGS_FILE: &str = "settings.json";
/// Field a stored record carries its channel class key under.
pub const CLASS_KEY_PARAM: &str = "class_key";

/// Settings for using the trolley command line. Saves often-repeated settings so that
/// `trolley download suid 1.2.3` works without naming any server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrolleyToolSettings {
    pub searcher_name: String,
    pub downloader_name: String,
    #[serde(default)]
    pub query_missing: Option<bool>,
    /// Only used by rad69 downloads.
    #[serde(default)]
    pub http_chunk_size: Option<usize>,
    #[serde(default = "default_request_per_series")]
    pub request_per_series: bool,
    #[serde(default)]
    pub channels: Vec<String>,
}

fn default_request_per_series() -> bool {
    true
}

impl TrolleyToolSettings {
    pub fn new(searcher_name: impl Into<String>, downloader_name: impl Into<String>) -> Self {
        Self {
            searcher_name: searcher_name.into(),
            downloader_name: downloader_name.into(),
            query_missing: None,
            http_chunk_size: None,
            request_per_series: true,
            channels: Vec::new(),
        }
    }

    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            http_chunk_size: self.http_chunk_size,
            request_per_series: self.request_per_series,
        }
    }

    /// Add a channel name to the known list, keeping it free of duplicates.
    pub fn remember_channel(&mut self, name: &str) {
        if !self.channels.iter().any(|c| c == name) {
            self.channels.push(name.to_string());
        }
    }

    pub fn forget_channel(&mut self, name: &str) {
        self.channels.retain(|c| c != name);
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for TrolleyToolSettings {
    fn default() -> Self {
        Self::new("VNA_MINT", "VNA_RAD69")
    }
}

/// `$HOME/.trolleytool/settings.json`
pub fn default_settings_path() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| {
            TrolleyToolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory (HOME is not set)",
            ))
        })?;
    Ok(PathBuf::from(home).join(SETTINGS_DIR).join(SETTINGS_FILE))
}

/// A file from which settings can be loaded.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_settings(&self) -> Result<TrolleyToolSettings> {
        self.assert_settings()?;
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, settings: &TrolleyToolSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, settings.to_json()?)?;
        debug!("Saved settings to {:?}", self.path);
        Ok(())
    }

    /// Write default settings if there is no file yet.
    fn assert_settings(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        info!(
            "No settings file found. Creating default settings at {:?}",
            self.path
        );
        self.save(&TrolleyToolSettings::default())
    }
}

/// Something you can store channels in. Records are JSON objects carrying an extra class key.
pub trait SecretStore {
    fn save_value(&self, key: &str, value: &str) -> Result<()>;

    /// Fails with `NotFound` if the key is not in storage.
    fn load_value(&self, key: &str) -> Result<String>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Saves channel fields (secrets in plain text) and adds its class key as a field.
    fn save_channel(&self, key: &str, channel: &Channel) -> Result<()> {
        let mut record = channel.to_record()?;
        if record.contains_key(CLASS_KEY_PARAM) {
            return Err(TrolleyToolError::ReservedKeyCollision(
                CLASS_KEY_PARAM.to_string(),
            ));
        }
        record.insert(
            CLASS_KEY_PARAM.to_string(),
            Value::String(ChannelFactory::class_key(channel)?.to_string()),
        );
        self.save_value(key, &serde_json::to_string(&record)?)
    }

    fn load_channel(&self, key: &str) -> Result<Channel> {
        let invalid = |reason: String| TrolleyToolError::InvalidRecord {
            key: key.to_string(),
            reason,
        };
        let mut record: Map<String, Value> = serde_json::from_str(&self.load_value(key)?)
            .map_err(|e| invalid(e.to_string()))?;
        let class_key = match record.remove(CLASS_KEY_PARAM) {
            Some(Value::String(class_key)) => class_key,
            _ => return Err(invalid(format!("no '{}' field", CLASS_KEY_PARAM))),
        };
        ChannelFactory::channel_kind(&class_key)?
            .build(record)
            .map_err(|e| invalid(e.to_string()))
    }
}

/// Stores records in the operating system keychain.
#[derive(Debug, Clone)]
pub struct KeyRingStorage {
    service_name: String,
}

impl Default for KeyRingStorage {
    fn default() -> Self {
        Self {
            service_name: KEYRING_SERVICE.to_string(),
        }
    }
}

impl KeyRingStorage {
    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        Ok(keyring::Entry::new(&self.service_name, key)?)
    }

    fn not_found(&self, key: &str) -> TrolleyToolError {
        TrolleyToolError::NotFound {
            key: key.to_string(),
            backend: format!("keyring service '{}'", self.service_name),
        }
    }
}

impl SecretStore for KeyRingStorage {
    fn save_value(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn load_value(&self, key: &str) -> Result<String> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(value),
            Err(keyring::Error::NoEntry) => Err(self.not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Err(self.not_found(key)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Stores in memory. Only useful for testing.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    storage: RefCell<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(key: &str) -> TrolleyToolError {
        TrolleyToolError::NotFound {
            key: key.to_string(),
            backend: "memory storage".to_string(),
        }
    }
}

impl SecretStore for MemoryStorage {
    fn save_value(&self, key: &str, value: &str) -> Result<()> {
        self.storage
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load_value(&self, key: &str) -> Result<String> {
        self.storage
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| Self::not_found(key))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.storage
            .borrow_mut()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(key))
    }
}

impl Trolley {
    /// Trolley built from the searcher and downloader channels named in settings.
    pub fn from_settings(
        settings: &TrolleyToolSettings,
        storage: &dyn SecretStore,
    ) -> Result<Trolley> {
        debug!(
            "Loading searcher '{}' and downloader '{}'",
            settings.searcher_name, settings.downloader_name
        );
        let searcher_channel = storage.load_channel(&settings.searcher_name)?;
        let downloader_channel = storage.load_channel(&settings.downloader_name)?;
        let searcher = searcher_channel.init_searcher()?;
        let downloader = downloader_channel.init_downloader(&settings.download_options())?;
        let mut trolley = Trolley::new(searcher, downloader);
        if let Some(query_missing) = settings.query_missing {
            trolley.query_missing = query_missing;
        }
        Ok(trolley)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{MintChannel, Rad69Channel, Secret};
    use tempfile::tempdir;

    fn a_mint_channel() -> Channel {
        Channel::Mint(MintChannel {
            key: "test_channel".into(),
            description: String::new(),
            login_url: "login_url".into(),
            mint_url: "mint_url".into(),
            user: "user".into(),
            password: Secret::new("specialpass"),
            realm: "realm".into(),
        })
    }

    #[test]
    fn channel_round_trips_through_storage() {
        let storage = MemoryStorage::new();
        let channel = a_mint_channel();
        storage.save_channel("c1", &channel).expect("save");

        let loaded = storage.load_channel("c1").expect("load");
        assert_eq!(loaded, channel);
        let Channel::Mint(mint) = &loaded else {
            panic!("expected a mint channel, got {loaded:?}");
        };
        assert_eq!(mint.password.expose_secret(), "specialpass");
        assert_eq!(ChannelFactory::class_key(&loaded).expect("key"), "mint");
    }

    #[test]
    fn stored_record_has_plain_secret_and_class_key() {
        let storage = MemoryStorage::new();
        storage.save_channel("c1", &a_mint_channel()).expect("save");

        let raw: Map<String, Value> =
            serde_json::from_str(&storage.load_value("c1").expect("raw")).expect("json");
        assert_eq!(raw["password"], "specialpass");
        assert_eq!(raw["class_key"], "mint");
    }

    #[test]
    fn rad69_round_trip_keeps_every_field() {
        let storage = MemoryStorage::new();
        let channel = Channel::Rad69(Rad69Channel {
            key: "VNA_RAD69".into(),
            description: "archive downloads".into(),
            login_url: "https://login".into(),
            rad69_url: "https://rad69".into(),
            user: "me".into(),
            password: Secret::new("pw"),
            realm: "hospital".into(),
        });
        storage.save_channel("VNA_RAD69", &channel).expect("save");
        assert_eq!(storage.load_channel("VNA_RAD69").expect("load"), channel);
    }

    #[test]
    fn missing_key_is_not_found() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.load_channel("nope"),
            Err(TrolleyToolError::NotFound { .. })
        ));
        assert!(matches!(
            storage.delete("nope"),
            Err(TrolleyToolError::NotFound { .. })
        ));
    }

    #[test]
    fn unknown_class_key_in_record_is_rejected() {
        let storage = MemoryStorage::new();
        storage
            .save_value("weird", r#"{"key": "weird", "class_key": "ftp"}"#)
            .expect("save");
        assert!(matches!(
            storage.load_channel("weird"),
            Err(TrolleyToolError::UnknownDiscriminator { .. })
        ));

        storage.save_value("bare", r#"{"key": "bare"}"#).expect("save");
        assert!(matches!(
            storage.load_channel("bare"),
            Err(TrolleyToolError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn trolley_needs_both_channels_in_storage() {
        let storage = MemoryStorage::new();
        storage.save_channel("VNA_MINT", &a_mint_channel()).expect("save");
        let settings = TrolleyToolSettings::default();

        assert!(matches!(
            Trolley::from_settings(&settings, &storage),
            Err(TrolleyToolError::NotFound { ref key, .. }) if key == "VNA_RAD69"
        ));
    }

    #[test]
    fn trolley_rejects_channel_without_search_role() {
        let storage = MemoryStorage::new();
        let rad69 = Channel::Rad69(Rad69Channel {
            key: "VNA_RAD69".into(),
            description: String::new(),
            login_url: String::new(),
            rad69_url: "https://rad69".into(),
            user: "me".into(),
            password: Secret::new("pw"),
            realm: String::new(),
        });
        storage.save_channel("VNA_RAD69", &rad69).expect("save");
        let settings = TrolleyToolSettings::new("VNA_RAD69", "VNA_RAD69");

        assert!(matches!(
            Trolley::from_settings(&settings, &storage),
            Err(TrolleyToolError::UnsupportedRole { .. })
        ));
    }

    #[test]
    fn settings_are_created_with_defaults() {
        let dir = tempdir().expect("tmpdir");
        let file = SettingsFile::new(dir.path().join("nested").join("settings.json"));

        let settings = file.load_settings().expect("load");
        assert!(file.path().exists());
        assert_eq!(settings.searcher_name, "VNA_MINT");
        assert_eq!(settings.downloader_name, "VNA_RAD69");
        assert!(settings.request_per_series);
        assert!(settings.channels.is_empty());
    }

    #[test]
    fn settings_round_trip() {
        let dir = tempdir().expect("tmpdir");
        let file = SettingsFile::new(dir.path().join("test_settings.json"));
        let mut settings = TrolleyToolSettings::new("searcher", "downloader");
        settings.http_chunk_size = Some(1024);
        settings.remember_channel("searcher");
        settings.remember_channel("searcher");

        file.save(&settings).expect("save");
        let loaded = file.load_settings().expect("load");
        assert_eq!(loaded, settings);
        assert_eq!(loaded.channels, vec!["searcher".to_string()]);
    }

    #[test]
    fn optional_settings_fields_may_be_missing() {
        let settings: TrolleyToolSettings =
            serde_json::from_str(r#"{"searcher_name": "a", "downloader_name": "b"}"#)
                .expect("parse");
        assert_eq!(settings.query_missing, None);
        assert!(settings.request_per_series);
    }
}
