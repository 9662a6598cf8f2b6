//! Persistence of the last connected device id.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::Result;
use crate::utils::normalize_device_id;

/// Storage for the id of the most recently connected device.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceStore: Send + Sync {
    /// Load the stored id, if any.
    fn load(&self) -> Result<Option<String>>;

    /// Store `device_id`, replacing any previous id.
    fn save(&self, device_id: &str) -> Result<()>;
}

/// Device store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    device_id: RwLock<Option<String>>,
}

impl MemoryDeviceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `device_id`.
    pub fn with_device(device_id: &str) -> Self {
        Self {
            device_id: RwLock::new(normalize_device_id(device_id)),
        }
    }
}

impl DeviceStore for MemoryDeviceStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.device_id.read().clone())
    }

    fn save(&self, device_id: &str) -> Result<()> {
        *self.device_id.write() = normalize_device_id(device_id);
        Ok(())
    }
}

/// Device store backed by a one-line text file.
#[derive(Debug, Clone)]
pub struct FileDeviceStore {
    path: PathBuf,
}

impl FileDeviceStore {
    /// Create a store at `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceStore for FileDeviceStore {
    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(normalize_device_id(&contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, device_id: &str) -> Result<()> {
        let id = normalize_device_id(device_id).unwrap_or_default();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, format!("{}\n", id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_memory_store() {
        let store = MemoryDeviceStore::new();
        assert_eq!(store.load().unwrap(), None);
        store.save(" b5a3f21c ").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("B5A3F21C"));

        let seeded = MemoryDeviceStore::with_device("abc");
        assert_eq!(seeded.load().unwrap().as_deref(), Some("ABC"));
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDeviceStore::new(dir.path().join("state").join("device_id"));
        assert_eq!(store.load().unwrap(), None);

        store.save("a1b2c3d4").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("A1B2C3D4"));

        store.save("E5F6").unwrap();
        assert_eq!(
            std::fs::read_to_string(store.path()).unwrap(),
            "E5F6\n"
        );
    }

    #[test]
    fn test_file_store_blank_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_id");
        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(FileDeviceStore::new(path).load().unwrap(), None);
    }

    #[test]
    fn test_file_store_unreadable_path() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a file.
        let store = FileDeviceStore::new(dir.path());
        assert!(matches!(store.load(), Err(Error::Io(_))));
    }

    #[test]
    fn test_mock_store() {
        let mut mock = MockDeviceStore::new();
        mock.expect_load()
            .times(1)
            .returning(|| Ok(Some("CAFE".to_string())));
        mock.expect_save().never();
        assert_eq!(mock.load().unwrap().as_deref(), Some("CAFE"));
    }
}
