use crate::error::StorageError;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Name of the single blob holding the queue state.
pub const STATE_KEY: &str = "upload-queue";

/// Session-scoped durable storage for the queue state blob.
pub trait StateStorage: Send + Sync {
    fn load(&self) -> Result<Option<String>, StorageError>;
    fn save(&self, blob: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// Keeps the blob in a JSON file, replaced atomically on every save.
pub struct FileStateStorage {
    path: PathBuf,
}

impl FileStateStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(format!("{}.json", STATE_KEY)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStorage for FileStateStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, blob: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process storage, used by tests and by callers that opt out of persistence.
#[derive(Default)]
pub struct MemoryStateStorage {
    blob: Mutex<Option<String>>,
}

impl MemoryStateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(blob: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(blob.into())),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.blob.lock().clone()
    }
}

impl StateStorage for MemoryStateStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.blob.lock().clone())
    }

    fn save(&self, blob: &str) -> Result<(), StorageError> {
        *self.blob.lock() = Some(blob.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.blob.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStateStorage::in_dir(dir.path().join("session"));
        assert!(storage.load().unwrap().is_none());

        storage.save(r#"{"records":[]}"#).unwrap();
        assert_eq!(storage.load().unwrap().as_deref(), Some(r#"{"records":[]}"#));
        assert!(storage.path().ends_with("upload-queue.json"));

        storage.clear().unwrap();
        assert!(storage.load().unwrap().is_none());
        storage.clear().unwrap();
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStateStorage::seeded("x");
        assert_eq!(storage.load().unwrap().as_deref(), Some("x"));
        storage.clear().unwrap();
        assert!(storage.contents().is_none());
    }
}
