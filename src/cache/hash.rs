//! Filename derivation for the disk backend.

use sha2::{Digest, Sha256};

/// Maps a cache key to a hex digest. Not used for any security property.
pub trait Hasher: Send + Sync + std::fmt::Debug {
    fn digest(&self, data: &[u8]) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn digest(&self, data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }
}
