//! Content hashing for metadata documents and introspection fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::metadata::Metadata;

/// SHA256 of a serializable value, as 64 lowercase hex characters.
///
/// The value is serialized to JSON first. Struct fields serialize in
/// declaration order and the document only uses ordered maps, so equal
/// values hash equally.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Content hash of a whole metadata document.
pub fn metadata_hash(metadata: &Metadata) -> Result<String, serde_json::Error> {
    compute_hash(metadata)
}

/// Fingerprint used to decide whether a cached introspection result is still
/// valid for a definition. A definition that cannot be hashed gets a
/// fingerprint that never matches, so it is always refetched.
pub fn fingerprint<T: Serialize>(value: &T) -> String {
    compute_hash(value).unwrap_or_default()
}
