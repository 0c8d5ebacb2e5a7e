//! Query fingerprinting: collapse whitespace, fold case, SHA-256.
//!
//! Two statements that differ only in letter case or in how whitespace is
//! laid out produce the same fingerprint, so recurring queries can be grouped.

use sha2::{Digest, Sha256};

/// Collapse every whitespace run to a single space and lowercase the text.
///
/// Leading and trailing whitespace is dropped.
pub fn normalize_query(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lowercase hex SHA-256 digest (64 chars) of the normalized query text.
pub fn query_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(normalize_query(text).as_bytes()))
}
