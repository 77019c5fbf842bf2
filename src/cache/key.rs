use sha2::{Digest, Sha256};

/// Derives the stable cache key for a resource URL.
///
/// The key names the resource's files on disk, so it must be deterministic
/// across processes and safe in a filename: a lowercase hex SHA-256 of the
/// URL bytes. Two items sharing a URL share a key, and therefore share the
/// cached resource.
pub fn resource_key(url: &str) -> String {
    let hash = Sha256::digest(url.as_bytes());
    hex::encode(hash)
}
