//! Durable storage for the upload queue snapshot.

use crate::error::AppError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key/value style storage holding one JSON snapshot
pub trait QueueStorage: Send + Sync {
    /// The last saved snapshot, `None` when nothing was saved yet
    fn load(&self) -> Result<Option<String>, AppError>;
    fn save(&self, snapshot: &str) -> Result<(), AppError>;
    fn clear(&self) -> Result<(), AppError>;
}

/// Snapshot stored as a JSON file in the app data directory
#[derive(Debug, Clone)]
pub struct FileQueueStorage {
    path: PathBuf,
}

impl FileQueueStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueueStorage for FileQueueStorage {
    fn load(&self) -> Result<Option<String>, AppError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, snapshot: &str) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write to a sibling file first so a kill mid-write leaves the old snapshot intact
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, snapshot)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), AppError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Volatile storage for tests and for running without a data directory
#[derive(Debug, Default)]
pub struct MemoryQueueStorage {
    snapshot: Mutex<Option<String>>,
}

impl MemoryQueueStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeded storage, e.g. a snapshot left behind by a killed process
    pub fn with_snapshot(snapshot: impl Into<String>) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot.into())),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.snapshot.lock().ok().and_then(|guard| guard.clone())
    }
}

impl QueueStorage for MemoryQueueStorage {
    fn load(&self) -> Result<Option<String>, AppError> {
        let guard = self
            .snapshot
            .lock()
            .map_err(|_| AppError::Other("Queue storage lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn save(&self, snapshot: &str) -> Result<(), AppError> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|_| AppError::Other("Queue storage lock poisoned".to_string()))?;
        *guard = Some(snapshot.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), AppError> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|_| AppError::Other("Queue storage lock poisoned".to_string()))?;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileQueueStorage::new(dir.path().join("queue").join("upload_queue.json"));

        assert!(storage.load().unwrap().is_none());
        storage.save("{\"items\":[]}").unwrap();
        assert_eq!(storage.load().unwrap().as_deref(), Some("{\"items\":[]}"));

        storage.clear().unwrap();
        assert!(storage.load().unwrap().is_none());
        storage.clear().unwrap();
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryQueueStorage::with_snapshot("old");
        assert_eq!(storage.load().unwrap().as_deref(), Some("old"));
        storage.save("new").unwrap();
        assert_eq!(storage.contents().as_deref(), Some("new"));
    }
}
