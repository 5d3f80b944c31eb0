//! Cache entry wire format.

use bytes::Bytes;

use crate::cache::entry::CacheEntry;
use crate::cache::CacheError;

/// Converts cache entries to and from the bytes a backend stores.
pub trait Serializer: Send + Sync + std::fmt::Debug {
    fn encode(&self, entry: &CacheEntry) -> Result<Bytes, CacheError>;
    fn decode(&self, bytes: &[u8]) -> Result<CacheEntry, CacheError>;
}

/// MessagePack with named fields, so entries survive field reordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackSerializer;

impl Serializer for MsgpackSerializer {
    fn encode(&self, entry: &CacheEntry) -> Result<Bytes, CacheError> {
        Ok(Bytes::from(rmp_serde::to_vec_named(entry)?))
    }

    fn decode(&self, bytes: &[u8]) -> Result<CacheEntry, CacheError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
