// State module - JSON files on disk written atomically

use crate::error::{Result, VigilError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A single JSON document persisted at a fixed path
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a half-written file.
#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            _marker: PhantomData,
        }
    }

    /// Load the document, or `None` if the file does not exist yet
    pub fn load(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file = File::open(&self.path).map_err(|e| {
            VigilError::StateLoadError(format!(
                "Failed to open {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let value = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            VigilError::StateLoadError(format!(
                "Failed to parse {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(Some(value))
    }

    pub fn save(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    VigilError::StateSaveError(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let temp_path = self.path.with_extension("tmp");

        {
            let file = File::create(&temp_path).map_err(|e| {
                VigilError::StateSaveError(format!("Failed to create temp file: {}", e))
            })?;
            let mut writer = BufWriter::new(file);

            serde_json::to_writer_pretty(&mut writer, value).map_err(|e| {
                VigilError::StateSaveError(format!("Failed to serialize state: {}", e))
            })?;

            writer.flush().map_err(|e| {
                VigilError::StateSaveError(format!("Failed to flush state file: {}", e))
            })?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            VigilError::StateSaveError(format!("Failed to rename temp file: {}", e))
        })?;

        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| {
                VigilError::StateError(format!(
                    "Failed to remove {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        name: String,
        count: u32,
    }

    #[test]
    fn test_missing_file_loads_none() {
        let temp_dir = TempDir::new().unwrap();
        let store: JsonStore<Snapshot> = JsonStore::new(temp_dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonStore::new(temp_dir.path().join("nested/dir/state.json"));

        let snapshot = Snapshot {
            name: "pool".to_string(),
            count: 3,
        };
        store.save(&snapshot).unwrap();

        assert_eq!(store.load().unwrap(), Some(snapshot));
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let store: JsonStore<Snapshot> = JsonStore::new(&path);
        assert!(matches!(store.load(), Err(VigilError::StateLoadError(_))));
    }

    #[test]
    fn test_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonStore::new(temp_dir.path().join("state.json"));
        store
            .save(&Snapshot {
                name: "x".to_string(),
                count: 0,
            })
            .unwrap();

        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }
}
