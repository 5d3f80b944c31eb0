//! In-process cache tier.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::cache::{CacheBackend, CacheError};

/// Unbounded map of encoded entries, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Bytes>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        self.entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}
