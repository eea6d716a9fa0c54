//! Local evidence store.
//!
//! Elements park evidence artifacts here until the transfer worker ships
//! them upstream. The on-disk layout is one directory per instance:
//!
//! ```text
//! <root>/<instance>/meta.json   — instance metadata (ident, bid, ...)
//! <root>/<instance>/<id>        — one file per cached evidence blob
//! ```
//!
//! Successfully uploaded blobs are deleted; failed ones stay on disk and
//! are reintroduced by the next cold-start seed.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("evidence I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad metadata for instance {instance}: {reason}")]
    Meta { instance: String, reason: String },
}

/// Instance metadata projected into a transfer session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceMeta {
    /// Backend agent id; `0` until resolved.
    #[serde(default)]
    pub bid:       u64,
    pub ident:     String,
    pub subtype:   String,
    #[serde(default)]
    pub version:   String,
    #[serde(default)]
    pub user:      String,
    #[serde(default)]
    pub device:    String,
    #[serde(default)]
    pub source:    String,
    #[serde(default)]
    pub sync_time: i64,
}

/// Interface the transfer worker drains. File-backed in production;
/// tests swap in whatever they need.
pub trait EvidenceStore: Send + Sync {
    /// Instance ids with cached evidence or metadata.
    fn instances(&self) -> Vec<String>;

    /// Cached evidence ids for one instance, in stable (sorted) order.
    fn evidence_ids(&self, instance: &str) -> Vec<String>;

    fn meta(&self, instance: &str) -> Result<InstanceMeta, EvidenceError>;

    fn read(&self, instance: &str, id: &str) -> Result<Vec<u8>, EvidenceError>;

    fn delete(&self, instance: &str, id: &str) -> Result<(), EvidenceError>;
}

const META_FILE: &str = "meta.json";

/// Directory-per-instance store under a single root.
pub struct FileEvidenceStore {
    root: PathBuf,
}

impl FileEvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn instance_dir(&self, instance: &str) -> PathBuf {
        self.root.join(instance)
    }

    fn read_dir_names(path: &Path) -> Vec<String> {
        let Ok(entries) = fs::read_dir(path) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }
}

impl EvidenceStore for FileEvidenceStore {
    fn instances(&self) -> Vec<String> {
        Self::read_dir_names(&self.root)
            .into_iter()
            .filter(|n| self.root.join(n).is_dir())
            .collect()
    }

    fn evidence_ids(&self, instance: &str) -> Vec<String> {
        Self::read_dir_names(&self.instance_dir(instance))
            .into_iter()
            .filter(|n| n != META_FILE)
            .collect()
    }

    fn meta(&self, instance: &str) -> Result<InstanceMeta, EvidenceError> {
        let raw = fs::read(self.instance_dir(instance).join(META_FILE))?;
        serde_json::from_slice(&raw).map_err(|e| EvidenceError::Meta {
            instance: instance.to_owned(),
            reason: e.to_string(),
        })
    }

    fn read(&self, instance: &str, id: &str) -> Result<Vec<u8>, EvidenceError> {
        Ok(fs::read(self.instance_dir(instance).join(id))?)
    }

    fn delete(&self, instance: &str, id: &str) -> Result<(), EvidenceError> {
        fs::remove_file(self.instance_dir(instance).join(id))?;
        Ok(())
    }
}
