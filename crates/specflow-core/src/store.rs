use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::stage::StageRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Invalid store key: {0}")]
    InvalidKey(String),
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize stage record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Raw documents keyed by `<feature>/<file name>`.
pub trait DocumentStore {
    fn read(&self, key: &str) -> Result<String, StoreError>;
    fn write(&self, key: &str, text: &str) -> Result<(), StoreError>;
}

/// Stage records keyed by feature name. Absent records read as all-false.
pub trait StageStore {
    fn read_stages(&self, feature: &str) -> Result<StageRecord, StoreError>;
    fn write_stages(&self, feature: &str, record: &StageRecord) -> Result<(), StoreError>;
    fn has_stages(&self, feature: &str) -> Result<bool, StoreError>;
}

pub fn document_key(feature: &str, name: &str) -> String {
    format!("{}/{}", feature, name)
}

/// SHA-256 hex digest of a document body.
pub fn document_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn now_rfc3339() -> String {
    Local::now().to_rfc3339()
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, String>>,
    stages: Mutex<HashMap<String, StageRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, key: &str, text: &str) -> Self {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), text.to_string());
        self
    }
}

impl DocumentStore for MemoryStore {
    fn read(&self, key: &str) -> Result<String, StoreError> {
        let documents = self
            .documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        documents
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn write(&self, key: &str, text: &str) -> Result<(), StoreError> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), text.to_string());
        Ok(())
    }
}

impl StageStore for MemoryStore {
    fn read_stages(&self, feature: &str) -> Result<StageRecord, StoreError> {
        let stages = self
            .stages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(stages.get(feature).cloned().unwrap_or_default())
    }

    fn write_stages(&self, feature: &str, record: &StageRecord) -> Result<(), StoreError> {
        let mut record = record.clone();
        record.updated_at = Some(now_rfc3339());
        self.stages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(feature.to_string(), record);
        Ok(())
    }

    fn has_stages(&self, feature: &str) -> Result<bool, StoreError> {
        let stages = self
            .stages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(stages.contains_key(feature))
    }
}

/// Feature directories under a single root:
///
/// ```text
/// <root>/<feature>/requirements.md
/// <root>/<feature>/design.md
/// <root>/<feature>/tasks.md
/// <root>/<feature>/stages.json
/// ```
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stages_path(&self, feature: &str) -> Result<PathBuf, StoreError> {
        Ok(self.resolve(feature)?.join("stages.json"))
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let clean = !key.trim().is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !clean {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Writes through a temp file and rename while holding the directory lock.
    fn write_locked(&self, path: &Path, body: &[u8]) -> Result<(), StoreError> {
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
        fs::create_dir_all(dir)?;
        let lock = lock_dir(dir)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = dir.join(format!(".{}.tmp", file_name));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        drop(lock);
        tracing::debug!(path = %path.display(), "document written");
        Ok(())
    }
}

fn lock_dir(dir: &Path) -> Result<File, StoreError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(dir.join(".specflow.lock"))?;
    FileExt::lock_exclusive(&file)?;
    Ok(file)
}

impl DocumentStore for FsStore {
    fn read(&self, key: &str) -> Result<String, StoreError> {
        let path = self.resolve(key)?;
        if !path.is_file() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(fs::read_to_string(path)?)
    }

    fn write(&self, key: &str, text: &str) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        self.write_locked(&path, text.as_bytes())
    }
}

impl StageStore for FsStore {
    fn read_stages(&self, feature: &str) -> Result<StageRecord, StoreError> {
        let path = self.stages_path(feature)?;
        if !path.is_file() {
            return Ok(StageRecord::default());
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_stages(&self, feature: &str, record: &StageRecord) -> Result<(), StoreError> {
        let mut record = record.clone();
        record.updated_at = Some(now_rfc3339());
        let raw = serde_json::to_string_pretty(&record)?;
        let path = self.stages_path(feature)?;
        self.write_locked(&path, raw.as_bytes())
    }

    fn has_stages(&self, feature: &str) -> Result<bool, StoreError> {
        Ok(self.stages_path(feature)?.is_file())
    }
}
