use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// A stable record identifier derived from the record's text.
///
/// Identical texts map to the same id, so re-ingesting a text overwrites
/// the existing record instead of duplicating it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId {
    /// Full lowercase hex SHA-256 digest, used as the index key.
    pub hex: String,
}

impl RecordId {
    pub fn for_text(text: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest.iter() {
            let _ = write!(hex, "{byte:02x}");
        }
        Self { hex }
    }

    /// The first `len` hex characters, for display.
    pub fn short(&self, len: usize) -> &str {
        &self.hex[..len.clamp(6, self.hex.len())]
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short(6))
    }
}
