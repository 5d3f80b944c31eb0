//! Content-hashed disk cache.
//!
//! Each key is stored as one file named by the hex digest of the key. Writes go
//! to a unique temporary file that is renamed into place, so readers never see
//! a partial entry and concurrent writers of one key leave the last complete one.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::hash::Hasher;
use crate::cache::{CacheBackend, CacheError};

#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    hasher: Arc<dyn Hasher>,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>, hasher: Arc<dyn Hasher>) -> Self {
        Self {
            root: root.into(),
            hasher,
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(self.hasher.digest(key.as_bytes()))
    }
}

#[async_trait]
impl CacheBackend for DiskCache {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn start(&self) -> Result<(), CacheError> {
        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(CacheError::NotADirectory(self.root.clone())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&self.root).await?;
                info!(root = %self.root.display(), "Created cache directory");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(fs::try_exists(self.path_for(key)).await?)
    }

    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        match fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CacheError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, &value).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(key, file = %path.display(), bytes = value.len(), "Wrote cache file");
        Ok(())
    }
}
