use std::{
    collections::{BTreeMap, HashMap},
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Origin-scoped string key-value storage; structured values are JSON text.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_raw(&self, key: &str, value: String) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.entries.write().await.insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

/// Keeps every entry in one JSON object file, rewritten through a temporary
/// file on each change.
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(error) => {
                    let backup = path.with_extension("corrupt.json");
                    log::warn!(
                        "Storage file {} is not valid JSON ({error}); moving it to {} and starting empty",
                        path.display(),
                        backup.display()
                    );
                    tokio::fs::rename(&path, &backup).await?;
                    BTreeMap::new()
                }
            },
            Err(error) if error.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => return Err(error.into()),
        };

        log::info!(
            "Opened storage {} with {} entries",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(entries)?;
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_owned(), value);
        self.persist(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_some() {
            self.persist(&entries).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TempDir;

    use super::*;

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = TempDir::new("kv-reopen");
        let path = dir.path().join("nested").join("storage.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        store.set_raw("user_total_points", "12".to_owned()).await.unwrap();
        store.set_raw("selected_date", "\"2025-05-31\"".to_owned()).await.unwrap();
        store.remove("selected_date").await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();

        assert_eq!(
            reopened.get_raw("user_total_points").await.unwrap().as_deref(),
            Some("12")
        );
        assert_eq!(reopened.get_raw("selected_date").await.unwrap(), None);
        assert_eq!(reopened.keys().await.unwrap(), vec!["user_total_points"]);
    }

    #[tokio::test]
    async fn corrupt_file_is_moved_aside() {
        let dir = TempDir::new("kv-corrupt");
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();

        assert!(store.keys().await.unwrap().is_empty());
        assert!(dir.path().join("storage.corrupt.json").exists());
    }
}
