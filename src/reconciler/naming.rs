//! # Object Naming
//!
//! Deterministic ScheduledScan names derived from (template, target).
//!
//! Target ids are arbitrary strings (ARNs, digest-pinned image refs), so the
//! name carries a hash of the pair instead of the id itself. The template
//! name prefix keeps objects readable in `kubectl get sscan`.

use sha2::{Digest, Sha256};

/// Hex characters of the digest kept in names and labels
pub const HASH_LEN: usize = 16;

/// Kubernetes object name limit (DNS-1123 label)
pub const MAX_NAME_LEN: usize = 63;

/// Room left for the template prefix after `-<hash>`
const MAX_PREFIX_LEN: usize = MAX_NAME_LEN - 1 - HASH_LEN;

fn short_digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..HASH_LEN].to_string()
}

/// Name of the ScheduledScan a template produces for a target
///
/// Template names are validated DNS-1123 labels when the catalog loads, so
/// the result is always a valid object name. A NUL separates the two inputs
/// so `("a", "b-c")` and `("a-b", "c")` never collide.
#[must_use]
pub fn scan_object_name(template_name: &str, target_id: &str) -> String {
    let hash = short_digest(&[template_name.as_bytes(), &[0], target_id.as_bytes()]);
    let prefix = template_name
        .get(..MAX_PREFIX_LEN)
        .unwrap_or(template_name)
        .trim_end_matches('-');
    format!("{prefix}-{hash}")
}

/// Label-safe fingerprint of a target id
#[must_use]
pub fn target_hash(target_id: &str) -> String {
    short_digest(&[target_id.as_bytes()])
}
