//! Pluggable chunk hashing.
//!
//! Chunk hashes identify content for de-duplication and verify integrity on
//! receipt; they are not a cryptographic security boundary, so a fast
//! non-cryptographic hash is the default. Implementations must be swappable,
//! but both sides of a transfer have to agree on one.

pub trait ChunkHasher: Send + Sync {
    fn digest(&self, data: &[u8]) -> u64;
    fn name(&self) -> &'static str;
}

/// Default hasher: XXH3-64.
#[derive(Debug, Default, Clone, Copy)]
pub struct Xxh3Hasher;

impl ChunkHasher for Xxh3Hasher {
    fn digest(&self, data: &[u8]) -> u64 {
        xxhash_rust::xxh3::xxh3_64(data)
    }

    fn name(&self) -> &'static str {
        "xxh3"
    }
}

/// Alternative hasher: the first 8 bytes of a BLAKE3 digest.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Hasher;

impl ChunkHasher for Blake3Hasher {
    fn digest(&self, data: &[u8]) -> u64 {
        let digest = blake3::hash(data);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_be_bytes(prefix)
    }

    fn name(&self) -> &'static str {
        "blake3"
    }
}
