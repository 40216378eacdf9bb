use serde_json::Value;

use crate::{
    config::HybridSettings,
    error::{Error, Result},
    registry::{Registry, Resources},
    sparse::SparseVector,
    vector_index::{Metadata, QueryMatch, QueryRequest},
};

/// Matches scoring at or below this are dropped by [`retrieve`].
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.3;

/// Metadata key holding the text of records written by ingestion.
pub const CONTEXT_KEY: &str = "context";

/// A hybrid search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub text: String,
    /// Remaining metadata, without the text key.
    pub metadata: Metadata,
    pub score: Option<f32>,
}

impl Document {
    /// Build a document from a raw match, moving the text out of its
    /// metadata. Matches without a string text are not documents.
    pub fn from_match(m: QueryMatch) -> Option<Self> {
        let mut metadata = m.metadata;
        let text = match metadata.remove(CONTEXT_KEY) {
            Some(Value::String(text)) => text,
            _ => {
                tracing::debug!(id = %m.id, "skipping match without text");
                return None;
            }
        };
        Some(Self {
            text,
            metadata,
            score: m.score,
        })
    }
}

/// Merge several queries into one search string.
///
/// Queries are joined with commas and the result is trimmed of surrounding
/// whitespace and commas, so a list of blank queries yields an empty string.
pub fn combine_queries(queries: &[String]) -> String {
    queries
        .join(",")
        .trim_matches(|c: char| c.is_whitespace() || c == ',')
        .to_string()
}

/// Weight the dense vector by `alpha` and the sparse vector by `1 - alpha`.
pub fn hybrid_scale(
    dense: &[f32],
    sparse: &SparseVector,
    alpha: f32,
) -> Result<(Vec<f32>, SparseVector)> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(Error::Validation(format!(
            "alpha must be between 0 and 1, got {alpha}"
        )));
    }
    let dense = dense.iter().map(|v| v * alpha).collect();
    Ok((dense, sparse.scale(1.0 - alpha)))
}

/// Run one hybrid (dense + BM25) query against the index.
pub async fn hybrid_search(
    resources: &Resources,
    settings: HybridSettings,
    namespace: &str,
    query: &str,
) -> Result<Vec<Document>> {
    let dense = resources.embedder.embed_query(query).await?;
    let sparse = resources.encoder.encode_query(query);
    let (dense, sparse) = hybrid_scale(&dense, &sparse, settings.alpha)?;

    let request = QueryRequest::dense(dense, settings.top_k, namespace)
        .with_sparse(sparse);
    let matches = resources.index.query(&request).await?;

    Ok(matches.into_iter().filter_map(Document::from_match).collect())
}

/// Keep the text of documents scoring strictly above `threshold`, and of
/// documents that carry no score at all. Order is preserved.
pub fn filter_by_score(documents: Vec<Document>, threshold: f32) -> Vec<String> {
    documents
        .into_iter()
        .filter(|doc| doc.score.is_none_or(|score| score > threshold))
        .map(|doc| doc.text)
        .collect()
}

/// Hybrid retrieval for a list of queries, most relevant first.
pub async fn retrieve(
    registry: &Registry,
    queries: &[String],
    score_threshold: f32,
) -> Result<Vec<String>> {
    if queries.is_empty() {
        return Err(Error::Validation(
            "queries must be a non-empty list".into(),
        ));
    }
    if !score_threshold.is_finite() {
        return Err(Error::Validation(format!(
            "score threshold must be a finite number, got {score_threshold}"
        )));
    }

    let combined = combine_queries(queries);
    if combined.is_empty() {
        return Ok(Vec::new());
    }

    let resources = registry.get_or_init().await?;
    let config = registry.config();
    let documents =
        hybrid_search(&resources, config.hybrid, &config.namespace, &combined)
            .await?;

    let found = documents.len();
    let kept = filter_by_score(documents, score_threshold);
    tracing::debug!(
        query = %combined,
        found,
        kept = kept.len(),
        threshold = score_threshold,
        "hybrid retrieval finished"
    );
    Ok(kept)
}
