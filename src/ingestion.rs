use std::collections::HashSet;

use rayon::prelude::*;
use serde_json::Value;

use crate::{
    doc_id::RecordId,
    error::{Error, Result},
    registry::{Registry, Resources},
    search::CONTEXT_KEY,
    sparse::Bm25Encoder,
    vector_index::{Metadata, VectorRecord},
};

/// Texts embedded and written per index request.
pub const UPSERT_BATCH_SIZE: usize = 32;

/// Drop blank texts and exact repeats, keeping first-seen order.
///
/// Texts are stored as given; whitespace only decides whether an entry is
/// blank.
pub fn prepare_texts(texts: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    texts
        .iter()
        .map(String::as_str)
        .filter(|t| !t.trim().is_empty() && seen.insert(*t))
        .collect()
}

/// Pair texts with their dense vectors and compute sparse vectors.
///
/// BM25 document encoding is CPU-bound, so it runs on the rayon pool.
pub fn build_records(
    encoder: &Bm25Encoder,
    texts: &[&str],
    dense: Vec<Vec<f32>>,
) -> Vec<VectorRecord> {
    texts
        .par_iter()
        .zip(dense.into_par_iter())
        .map(|(text, values)| {
            let sparse = encoder.encode_document(text);
            let mut metadata = Metadata::new();
            metadata.insert(CONTEXT_KEY.to_string(), Value::String(text.to_string()));
            VectorRecord {
                id: RecordId::for_text(text).hex,
                values,
                sparse_values: (!sparse.is_empty()).then_some(sparse),
                metadata,
            }
        })
        .collect()
}

/// Embed `texts` and write them to the configured namespace.
///
/// Returns the number of records written. A list holding only blank texts
/// writes nothing and succeeds.
pub async fn upsert(registry: &Registry, texts: &[String]) -> Result<usize> {
    if texts.is_empty() {
        return Err(Error::Validation("texts must be a non-empty list".into()));
    }
    let prepared = prepare_texts(texts);
    if prepared.is_empty() {
        tracing::debug!(texts = texts.len(), "no non-blank texts to upsert");
        return Ok(0);
    }

    let resources = registry.get_or_init().await?;
    let namespace = &registry.config().namespace;

    let mut written = 0;
    for batch in prepared.chunks(UPSERT_BATCH_SIZE) {
        written += upsert_batch(&resources, namespace, batch).await?;
    }

    tracing::info!(
        records = written,
        skipped = texts.len() - prepared.len(),
        index = resources.index.name(),
        "upserted texts"
    );
    Ok(written)
}

async fn upsert_batch(
    resources: &Resources,
    namespace: &str,
    batch: &[&str],
) -> Result<usize> {
    let owned: Vec<String> = batch.iter().map(|t| t.to_string()).collect();
    let dense = resources.embedder.embed_documents(&owned).await?;
    if dense.len() != batch.len() {
        return Err(Error::remote(
            "embedding",
            format!(
                "expected {} embeddings, received {}",
                batch.len(),
                dense.len()
            ),
        ));
    }

    let records = build_records(&resources.encoder, batch, dense);
    let written = resources.index.upsert(namespace, &records).await?;
    tracing::debug!(batch = batch.len(), written, "upserted batch");
    Ok(written)
}
