//! Dense-only keyword lookups against the index.
//!
//! Unlike hybrid retrieval these queries skip the sparse encoder, take an
//! explicit namespace, and pull record text out of arbitrary metadata
//! through a [`TextExtraction`] policy.

use std::collections::HashSet;

use crate::{
    error::{Error, Result},
    metadata::TextExtraction,
    registry::Registry,
    vector_index::{QueryMatch, QueryRequest},
};

/// Matches requested by [`query_keywords`].
pub const QUERY_TOP_K: usize = 100;
pub const DEFAULT_QUERY_THRESHOLD: f32 = 0.0;

pub const DEFAULT_SEARCH_TOP_K: usize = 5;
pub const DEFAULT_SEARCH_THRESHOLD: f32 = 0.5;

/// Largest `top_k` the index accepts.
pub const MAX_TOP_K: usize = 10_000;

/// Trim keywords and drop blank ones.
pub fn clean_keywords(keywords: &[String]) -> Vec<&str> {
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect()
}

/// Texts of records similar to `keywords`, without duplicates and in no
/// particular order.
pub async fn query_keywords(
    registry: &Registry,
    keywords: &[String],
    similarity_threshold: f32,
    namespace: &str,
) -> Result<Vec<String>> {
    let matches = dense_query(
        registry,
        keywords,
        QUERY_TOP_K,
        similarity_threshold,
        namespace,
    )
    .await?;

    let extraction = TextExtraction::lenient();
    let unique: HashSet<String> = matches
        .iter()
        .filter_map(|m| extraction.extract(&m.metadata))
        .collect();
    Ok(unique.into_iter().collect())
}

/// Texts of the `top_k` records most similar to `keywords`, best first.
pub async fn search_keywords(
    registry: &Registry,
    keywords: &[String],
    top_k: usize,
    similarity_threshold: f32,
    namespace: &str,
) -> Result<Vec<String>> {
    let matches =
        dense_query(registry, keywords, top_k, similarity_threshold, namespace)
            .await?;

    let extraction = TextExtraction::strict();
    let mut seen = HashSet::new();
    Ok(matches
        .iter()
        .filter_map(|m| extraction.extract(&m.metadata))
        .filter(|text| seen.insert(text.clone()))
        .collect())
}

/// Validate, embed the joined keywords and return the matches meeting the
/// threshold. A missing score counts as zero.
async fn dense_query(
    registry: &Registry,
    keywords: &[String],
    top_k: usize,
    threshold: f32,
    namespace: &str,
) -> Result<Vec<QueryMatch>> {
    if keywords.is_empty() {
        return Err(Error::Validation(
            "keywords must be a non-empty list".into(),
        ));
    }
    if !(1..=MAX_TOP_K).contains(&top_k) {
        return Err(Error::Validation(format!(
            "top_k must be between 1 and {MAX_TOP_K}, got {top_k}"
        )));
    }
    if !threshold.is_finite() {
        return Err(Error::Validation(format!(
            "similarity threshold must be a finite number, got {threshold}"
        )));
    }

    let cleaned = clean_keywords(keywords);
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }
    let query = cleaned.join(" ");

    let resources = registry.get_or_init().await?;
    let vector = resources.embedder.embed_query(&query).await?;
    let request = QueryRequest::dense(vector, top_k, namespace);
    let matches = resources.index.query(&request).await?;

    let found = matches.len();
    let kept: Vec<QueryMatch> = matches
        .into_iter()
        .filter(|m| m.score.unwrap_or(0.0) >= threshold)
        .collect();
    tracing::debug!(
        query = %query,
        namespace,
        found,
        kept = kept.len(),
        threshold,
        "dense keyword query finished"
    );
    Ok(kept)
}
