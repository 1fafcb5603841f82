//! Object storage targets for backups.
//!
//! # Design Decisions
//! - Paths are `/`-separated and relative to the target's root
//! - `list` is flat: it returns objects directly under the prefix's directory
//! - Local writes go to a temp file first and are renamed into place

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::backup::error::BackupError;
use crate::config::{BackupConfig, StorageTargetConfig};

/// One stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub path: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object path: {0:?}")]
    InvalidPath(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Storage backend capability.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;
}

/// Directory-backed storage.
#[derive(Debug, Clone)]
pub struct LocalDiskStorage {
    root: PathBuf,
}

impl LocalDiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(path);
        let clean = !path.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if clean {
            Ok(self.root.join(rel))
        } else {
            Err(StorageError::InvalidPath(path.to_string()))
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalDiskStorage {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = full.as_os_str().to_owned();
        tmp.push(".part");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &full).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        let dir = match prefix.rfind('/') {
            Some(i) => &prefix[..i],
            None => "",
        };
        let dir_path = if dir.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dir)?
        };

        let mut entries = match tokio::fs::read_dir(&dir_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut objects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".part") {
                continue;
            }
            let path = if dir.is_empty() {
                name
            } else {
                format!("{dir}/{name}")
            };
            if path.starts_with(prefix) {
                objects.push(ObjectMeta {
                    path,
                    last_modified: DateTime::<Utc>::from(meta.modified()?),
                    size: meta.len(),
                });
            }
        }
        Ok(objects)
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.resolve(path)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(self.resolve(path)?).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryObject {
    bytes: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// In-process storage. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<Mutex<BTreeMap<String, MemoryObject>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert with an explicit timestamp.
    pub fn insert_at(&self, path: &str, bytes: Vec<u8>, last_modified: DateTime<Utc>) {
        self.objects
            .lock()
            .expect("memory storage mutex poisoned")
            .insert(path.to_string(), MemoryObject { bytes, last_modified });
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects
            .lock()
            .expect("memory storage mutex poisoned")
            .contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects
            .lock()
            .expect("memory storage mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.insert_at(path, bytes, Utc::now());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        let objects = self.objects.lock().expect("memory storage mutex poisoned");
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, obj)| ObjectMeta {
                path: path.clone(),
                last_modified: obj.last_modified,
                size: obj.bytes.len() as u64,
            })
            .collect())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.objects
            .lock()
            .expect("memory storage mutex poisoned")
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .lock()
            .expect("memory storage mutex poisoned")
            .get(path)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}

/// Named storage targets.
#[derive(Clone, Default)]
pub struct StorageRegistry {
    targets: HashMap<String, Arc<dyn ObjectStorage>>,
    ephemeral: HashSet<String>,
}

impl StorageRegistry {
    pub fn from_config(config: &BackupConfig) -> Self {
        let mut registry = Self::default();
        for (name, target) in &config.storage {
            let storage: Arc<dyn ObjectStorage> = match target {
                StorageTargetConfig::Local { root } => Arc::new(LocalDiskStorage::new(root)),
                StorageTargetConfig::Memory => {
                    registry.ephemeral.insert(name.clone());
                    Arc::new(MemoryStorage::new())
                }
            };
            registry.register(name, storage);
        }
        registry
    }

    pub fn register(&mut self, name: &str, storage: Arc<dyn ObjectStorage>) {
        self.targets.insert(name.to_string(), storage);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ObjectStorage>, BackupError> {
        self.targets
            .get(name)
            .cloned()
            .ok_or_else(|| BackupError::UnknownStorage(name.to_string()))
    }

    /// Like `get`, but refuses targets whose contents vanish on exit.
    pub fn get_durable(&self, name: &str) -> Result<Arc<dyn ObjectStorage>, BackupError> {
        if self.ephemeral.contains(name) {
            return Err(BackupError::EphemeralStorage(name.to_string()));
        }
        self.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.targets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_put_list_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path());

        storage.put("backups/a.sql.gz", b"aaa".to_vec()).await.unwrap();
        storage.put("backups/b.sql", b"bb".to_vec()).await.unwrap();
        storage.put("other/c.sql", b"c".to_vec()).await.unwrap();

        let mut listed = storage.list("backups/").await.unwrap();
        listed.sort_by(|a, b| a.path.cmp(&b.path));
        let paths: Vec<_> = listed.iter().map(|o| o.path.as_str()).collect();
        assert_eq!(paths, ["backups/a.sql.gz", "backups/b.sql"]);
        assert_eq!(listed[0].size, 3);

        assert_eq!(storage.read("backups/b.sql").await.unwrap(), b"bb");
        storage.delete("backups/b.sql").await.unwrap();
        assert!(matches!(
            storage.read("backups/b.sql").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.delete("backups/b.sql").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_local_list_of_missing_prefix_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path());
        assert!(storage.list("backups/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path().join("root"));
        for bad in ["../evil", "/etc/passwd", "backups/../../x", ""] {
            assert!(matches!(
                storage.put(bad, vec![1]).await,
                Err(StorageError::InvalidPath(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_memory_list_is_prefix_scoped() {
        let storage = MemoryStorage::new();
        storage.put("backups/x", vec![1]).await.unwrap();
        storage.put("backupsZ/y", vec![2]).await.unwrap();
        storage.put("a/z", vec![3]).await.unwrap();
        let listed = storage.list("backups/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "backups/x");
    }

    #[test]
    fn test_registry_from_config() {
        let mut config = BackupConfig::default();
        config.storage.insert("scratch".to_string(), StorageTargetConfig::Memory);
        let registry = StorageRegistry::from_config(&config);
        assert_eq!(registry.names(), ["local", "scratch"]);
        assert!(registry.get("local").is_ok());
        assert!(matches!(
            registry.get("s3"),
            Err(BackupError::UnknownStorage(name)) if name == "s3"
        ));

        assert!(registry.get_durable("local").is_ok());
        assert!(registry.get("scratch").is_ok());
        let err = registry.get_durable("scratch").err().unwrap();
        assert_eq!(err.kind(), "EPHEMERAL_STORAGE");
        assert_eq!(err.stage().as_str(), "setup");
    }
}
