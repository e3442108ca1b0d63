use sha2::{Digest, Sha256};

/// Resolves a stable identifier for an entry using an ordered fallback chain.
///
/// First available wins:
///
/// 1. The explicit identifier (`<guid>` for RSS, `<id>` for Atom)
/// 2. The entry URL
/// 3. The entry title
/// 4. A deterministic hash of the content, rendered as decimal text
///
/// Returns `None` only when every source field is absent. The order is
/// load-bearing: a feed without native guids still gets usable identifiers
/// from URL or title, and the content hash gives pure-description feeds a
/// best-effort stable key. Edits to the description change that key and cause
/// redelivery — an accepted limitation of the last resort.
pub fn resolve(
    explicit: Option<&str>,
    url: Option<&str>,
    title: Option<&str>,
    content: Option<&str>,
) -> Option<String> {
    if let Some(id) = non_empty(explicit) {
        return Some(id.to_string());
    }
    if let Some(url) = non_empty(url) {
        return Some(url.to_string());
    }
    if let Some(title) = non_empty(title) {
        return Some(title.to_string());
    }
    non_empty(content).map(content_hash)
}

fn non_empty(field: Option<&str>) -> Option<&str> {
    field.map(str::trim).filter(|s| !s.is_empty())
}

/// Hashes content to a decimal identifier, stable across runs and platforms.
///
/// SHA-256 truncated to the first 8 bytes; cryptographic strength is not
/// required here, only determinism and a low collision rate.
fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes).to_string()
}
