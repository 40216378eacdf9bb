use crate::vector_index::Metadata;

/// Where to look for a record's text in its metadata.
///
/// Candidate keys are probed in order and the first non-empty string value
/// wins. When none matches and `stringify_fallback` is set, the whole
/// metadata map is rendered as JSON instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextExtraction {
    pub keys: &'static [&'static str],
    pub stringify_fallback: bool,
}

impl TextExtraction {
    /// Broad probing used when harvesting keywords from the index.
    pub const fn lenient() -> Self {
        Self {
            keys: &["text", "content", "page_content", "context"],
            stringify_fallback: true,
        }
    }

    /// Only the conventional text fields; records without one are skipped.
    pub const fn strict() -> Self {
        Self {
            keys: &["text", "content", "page_content"],
            stringify_fallback: false,
        }
    }

    pub fn extract(&self, metadata: &Metadata) -> Option<String> {
        let found = self.keys.iter().find_map(|key| {
            metadata
                .get(*key)
                .and_then(|value| value.as_str())
                .filter(|text| !text.is_empty())
        });
        if let Some(text) = found {
            return Some(text.to_string());
        }

        if self.stringify_fallback && !metadata.is_empty() {
            return serde_json::to_string(metadata).ok();
        }
        None
    }
}
