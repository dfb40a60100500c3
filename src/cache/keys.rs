//! Cache key composition.
//!
//! Ids are SHA-256 digests so that keys are stable across processes, which
//! distributed backends rely on.

use sha2::{Digest, Sha256};

use super::backend::{StorageContext, StorageGroup, StorageKey};

/// Separates the url from the variant inside the digest input. Neither
/// normalised urls nor variant keys contain it.
const VARIANT_SEPARATOR: char = '\u{1f}';

fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Address of the response body for `(url, variant_key)`.
pub fn response_key(url: &str, variant_key: &str) -> StorageKey {
    let id = digest(&format!("{url}{VARIANT_SEPARATOR}{variant_key}"));
    StorageKey::new(StorageGroup::Page, StorageContext::Response, id)
}

/// Address of the set of variant keys stored for `url`.
pub fn sidecar_key(url: &str) -> StorageKey {
    StorageKey::new(StorageGroup::Sidecar, StorageContext::Data, digest(url))
}
