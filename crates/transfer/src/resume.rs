//! Persistent map of in-flight uploads, so a restarted client can resume a
//! remote session instead of starting over.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::TransferError;

/// A remote session that can be resumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeEntry {
    pub remote_session_id: String,
    pub total_size: u64,
}

/// Fingerprint → resumable session, cached in memory and persisted to a
/// JSON file.
pub struct ResumeStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, ResumeEntry>>,
}

impl ResumeStore {
    /// Opens a store, loading existing entries from disk.
    pub fn new(path: PathBuf) -> Result<Self, TransferError> {
        let entries = load_entries(&path)?;
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Returns the entry for a fingerprint, if any.
    pub fn get(&self, fingerprint: &str) -> Option<ResumeEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fingerprint)
            .cloned()
    }

    /// Saves the session for a fingerprint.
    pub fn save(&self, fingerprint: &str, entry: ResumeEntry) -> Result<(), TransferError> {
        {
            let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            map.insert(fingerprint.to_string(), entry);
        }
        self.persist()
    }

    /// Forgets a fingerprint.
    pub fn remove(&self, fingerprint: &str) -> Result<(), TransferError> {
        let removed = {
            let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            map.remove(fingerprint).is_some()
        };
        if removed {
            self.persist()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the current entries to disk.
    fn persist(&self) -> Result<(), TransferError> {
        let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let json = serde_json::to_string_pretty(&*map)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!("persisted {} resumable upload(s) to {:?}", map.len(), self.path);
        Ok(())
    }
}

/// Loads entries from a JSON file on disk.
fn load_entries(path: &Path) -> Result<HashMap<String, ResumeEntry>, TransferError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let entries: HashMap<String, ResumeEntry> = serde_json::from_str(&data)?;
    debug!("loaded {} resumable upload(s) from {:?}", entries.len(), path);
    Ok(entries)
}

/// Fingerprint of a source identity uploaded to a given endpoint.
pub fn fingerprint(identity: &str, endpoint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    hasher.update(b"\n");
    hasher.update(endpoint.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns the default resume store path.
pub fn default_store_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("chunkup").join("resume.json"))
}

/// Returns the platform-specific config directory.
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
