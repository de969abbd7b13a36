//! Local alias directory
//!
//! A small stand-in for the distributed graph store: aliases map to directory
//! records and user-namespace entries. Either kept in memory or persisted as
//! JSON in ~/.config/entangle/directory.json.

use crate::identity::{alias_key, Directory, DirectoryRecord};
use async_trait::async_trait;
use entangle_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Stored data structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredDirectory {
    /// Alias nodes indexed by `~@alias`
    records: HashMap<String, DirectoryRecord>,
    /// User namespace: `~@alias` -> `~<public key>`
    users: HashMap<String, String>,
}

/// Alias directory with optional file persistence
pub struct DirectoryStore {
    /// Path to the storage file, None when memory-only
    path: Option<PathBuf>,
    data: Arc<RwLock<StoredDirectory>>,
}

impl DirectoryStore {
    /// Open the directory at the default location
    ///
    /// Loads existing data from disk if present.
    pub async fn new() -> Result<Self> {
        let path = Self::default_path()?;
        Self::with_path(path).await
    }

    /// Open the directory stored at a specific path
    pub async fn with_path(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let data = if tokio::fs::try_exists(&path).await? {
            let contents = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str(&contents) {
                Ok(data) => {
                    info!("Loaded alias directory from {:?}", path);
                    data
                }
                Err(e) => {
                    warn!("Failed to parse alias directory, starting fresh: {}", e);
                    StoredDirectory::default()
                }
            }
        } else {
            debug!("No existing alias directory, creating new");
            StoredDirectory::default()
        };

        Ok(Self {
            path: Some(path),
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// A directory that lives only as long as this value
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Arc::new(RwLock::new(StoredDirectory::default())),
        }
    }

    /// Get the default storage path (~/.config/entangle/directory.json)
    fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Configuration directory not found".into()))?;
        Ok(config_dir.join("entangle").join("directory.json"))
    }

    async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = {
            let data = self.data.read().await;
            serde_json::to_string_pretty(&*data)?
        };
        tokio::fs::write(path, json).await?;
        debug!("Saved alias directory to {:?}", path);
        Ok(())
    }

    /// Publish an alias pointing at `public_key`, in both namespaces
    pub async fn publish_alias(&self, alias: &str, public_key: &str) -> Result<()> {
        let key = alias_key(alias);
        let soul = format!("~{}", public_key.trim_start_matches('~'));
        {
            let mut data = self.data.write().await;
            data.records.insert(
                key.clone(),
                DirectoryRecord {
                    keys: vec![soul.clone()],
                },
            );
            data.users.insert(key.clone(), soul);
        }
        self.save().await?;
        info!("Published alias {}", key);
        Ok(())
    }

    /// Publish only the user-namespace entry, as seen before the alias node
    /// itself has synchronized
    pub async fn publish_user(&self, alias: &str, public_key: &str) -> Result<()> {
        let key = alias_key(alias);
        {
            let mut data = self.data.write().await;
            data.users
                .insert(key.clone(), format!("~{}", public_key.trim_start_matches('~')));
        }
        self.save().await
    }

    /// Remove an alias from both namespaces; returns whether it existed
    pub async fn remove_alias(&self, alias: &str) -> Result<bool> {
        let key = alias_key(alias);
        let existed = {
            let mut data = self.data.write().await;
            let record = data.records.remove(&key).is_some();
            let user = data.users.remove(&key).is_some();
            record || user
        };
        if existed {
            self.save().await?;
            info!("Removed alias {}", key);
        }
        Ok(existed)
    }

    /// All known aliases, sorted
    pub async fn aliases(&self) -> Vec<String> {
        let data = self.data.read().await;
        let mut aliases: Vec<String> = data
            .records
            .keys()
            .chain(data.users.keys())
            .cloned()
            .collect();
        aliases.sort();
        aliases.dedup();
        aliases
    }
}

#[async_trait]
impl Directory for DirectoryStore {
    async fn get(&self, key: &str) -> Result<Option<DirectoryRecord>> {
        let data = self.data.read().await;
        Ok(data.records.get(key).cloned())
    }

    async fn user(&self, alias: &str) -> Result<Option<String>> {
        let data = self.data.read().await;
        Ok(data.users.get(&alias_key(alias)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_publish_and_lookup() {
        let directory = DirectoryStore::in_memory();
        directory.publish_alias("alice", "KEY").await.unwrap();

        let record = directory.get("~@alice").await.unwrap().unwrap();
        assert_eq!(record.public_key(), Some("KEY"));
        assert_eq!(
            directory.user("alice").await.unwrap(),
            Some("~KEY".to_string())
        );
        assert_eq!(directory.aliases().await, vec!["~@alice".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_alias() {
        let directory = DirectoryStore::in_memory();
        directory.publish_alias("alice", "KEY").await.unwrap();

        assert!(directory.remove_alias("~@alice").await.unwrap());
        assert!(!directory.remove_alias("alice").await.unwrap());
        assert!(directory.get("~@alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("directory.json");

        {
            let directory = DirectoryStore::with_path(path.clone()).await.unwrap();
            directory.publish_alias("carol", "CAROLKEY").await.unwrap();
        }

        // Reload from disk
        let directory = DirectoryStore::with_path(path).await.unwrap();
        let record = directory.get("~@carol").await.unwrap().unwrap();
        assert_eq!(record.public_key(), Some("CAROLKEY"));
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("directory.json");
        std::fs::write(&path, "not json").unwrap();

        let directory = DirectoryStore::with_path(path).await.unwrap();
        assert!(directory.aliases().await.is_empty());
    }
}
