//! Deterministic cache addressing for derived artifacts.
//!
//! Every action result is stored under a name computed from the full request
//! fingerprint: asset collection and signature, action, canonical parameter
//! string and output format. Re-running a request therefore overwrites the
//! same file instead of creating a new one, and there is at most one artifact
//! per fingerprint.
//!
//! ## Name layout
//!
//! ```text
//! <collection>/<signature>-<action>-<digest>.<format>
//! ```
//!
//! - `collection`, `signature` and `action` are sanitised to
//!   `[A-Za-z0-9._-]` so they are safe path components. They only make names
//!   readable; uniqueness comes from the digest.
//! - **`digest`**: first 128 bits (32 hex chars) of a SHA-256 over all five
//!   inputs. Each input is length-prefixed, so `("ab", "c")` and `("a", "bc")`
//!   hash differently.

use sha2::{Digest, Sha256};

/// Hex characters of the digest kept in the name.
const DIGEST_CHARS: usize = 32;

/// Domain tag mixed into every digest. Bump to move all artifacts.
const DIGEST_TAG: &[u8] = b"mediaserver-cache-v1\0";

/// Cache file name for one (asset, action, params, format) fingerprint.
pub fn create_cache_name(
    collection: &str,
    signature: &str,
    action: &str,
    canonical_params: &str,
    format: &str,
) -> String {
    let format = format.to_ascii_lowercase();
    let digest = fingerprint(&[collection, signature, action, canonical_params, &format]);
    format!(
        "{}/{}-{}-{}.{}",
        sanitize(collection),
        sanitize(signature),
        sanitize(action),
        &digest[..DIGEST_CHARS],
        sanitize(&format)
    )
}

/// SHA-256 over length-prefixed fields, as a hex string.
fn fingerprint(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(DIGEST_TAG);
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Never produce "." or ".." as a path component.
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}
