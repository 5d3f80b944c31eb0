//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! CacheHandler (handlers/cache.rs)
//!     → cache_key(url)                    path or path.query
//!     → CacheBackend::has / get / set     bytes in, bytes out
//!     → Serializer (codec.rs)             CacheEntry <-> MessagePack
//! ```
//!
//! Backends:
//! - `memory.rs`  in-process map, no expiry
//! - `disk.rs`    one file per key, filename from the injected `Hasher`
//! - `remote.rs`  Redis through a bb8 pool, fixed expiration
//!
//! # Design Decisions
//! - Backends store opaque bytes; encoding is the caller's job, so every
//!   backend shares one entry format
//! - Backends are shared by all connections and need no external locking
//! - Concurrent `set` for the same key is last-writer-wins

pub mod codec;
pub mod disk;
pub mod entry;
pub mod hash;
pub mod memory;
pub mod remote;

use std::fmt::Debug;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use bb8_redis::bb8::RunError;
use redis::RedisError;

pub use codec::{MsgpackSerializer, Serializer};
pub use disk::DiskCache;
pub use entry::{cache_key, CacheEntry};
pub use hash::{Hasher, Sha256Hasher};
pub use memory::MemoryCache;
pub use remote::RemoteCache;

/// Errors from cache backends and the entry codec.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("no cache entry for key '{0}'")]
    NotFound(String),

    #[error("cache backend has not been started")]
    NotStarted,

    #[error("cache root {0} exists and is not a directory")]
    NotADirectory(PathBuf),

    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("redis command failed: {0}")]
    Redis(#[from] RedisError),

    #[error("redis pool error: {0}")]
    Pool(#[from] RunError<RedisError>),

    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode cache entry: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

/// Storage for encoded cache entries.
#[async_trait]
pub trait CacheBackend: Send + Sync + Debug {
    /// Short label for logs and metrics.
    fn name(&self) -> &'static str;

    /// Acquire external resources. Failure is fatal at process start.
    async fn start(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError>;

    /// Stored bytes, or [`CacheError::NotFound`].
    async fn get(&self, key: &str) -> Result<Bytes, CacheError>;

    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError>;
}
