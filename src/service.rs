//! The retrieval interface consumed by request handlers.
//!
//! Search is best effort: when an embedding, index or generation call
//! fails, the failure is logged and callers get an empty result (or
//! `false` for writes). Bad input and missing configuration are still
//! returned as errors.

use std::sync::Arc;

use crate::{
    direct,
    error::Result,
    ingestion,
    keywords::{self, KeywordRequest, TextGenerator},
    registry::Registry,
    search,
};

/// Outcome of [`SearchService::generate_and_store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKeywords {
    pub keywords: Vec<String>,
    pub stored: bool,
}

#[derive(Clone)]
pub struct SearchService {
    registry: Arc<Registry>,
}

impl SearchService {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Hybrid retrieval with the default score threshold.
    pub async fn retrieve(&self, queries: &[String]) -> Result<Vec<String>> {
        self.retrieve_with_threshold(queries, search::DEFAULT_SCORE_THRESHOLD)
            .await
    }

    pub async fn retrieve_with_threshold(
        &self,
        queries: &[String],
        score_threshold: f32,
    ) -> Result<Vec<String>> {
        degrade(
            "retrieve",
            search::retrieve(&self.registry, queries, score_threshold).await,
            Vec::new(),
        )
    }

    pub async fn query_keywords(
        &self,
        keywords: &[String],
        similarity_threshold: f32,
        namespace: &str,
    ) -> Result<Vec<String>> {
        degrade(
            "query_keywords",
            direct::query_keywords(
                &self.registry,
                keywords,
                similarity_threshold,
                namespace,
            )
            .await,
            Vec::new(),
        )
    }

    pub async fn search_keywords(
        &self,
        keywords: &[String],
        top_k: usize,
        similarity_threshold: f32,
        namespace: &str,
    ) -> Result<Vec<String>> {
        degrade(
            "search_keywords",
            direct::search_keywords(
                &self.registry,
                keywords,
                top_k,
                similarity_threshold,
                namespace,
            )
            .await,
            Vec::new(),
        )
    }

    /// Store `texts`, reporting whether the write went through.
    pub async fn upsert(&self, texts: &[String]) -> Result<bool> {
        degrade(
            "upsert",
            ingestion::upsert(&self.registry, texts).await.map(|_| true),
            false,
        )
    }

    /// Generate keywords for `request` and store them.
    ///
    /// Generation failures are returned; storage failures are reported
    /// through [`GeneratedKeywords::stored`].
    pub async fn generate_and_store(
        &self,
        generator: &dyn TextGenerator,
        request: &KeywordRequest,
    ) -> Result<GeneratedKeywords> {
        let keywords = keywords::generate_keywords(generator, request).await?;
        if keywords.is_empty() {
            tracing::warn!(topic = %request.topic, "model returned no keywords");
            return Ok(GeneratedKeywords {
                keywords,
                stored: false,
            });
        }
        let stored = self.upsert(&keywords).await?;
        Ok(GeneratedKeywords { keywords, stored })
    }
}

/// Replace a remote failure with `fallback`, logging it.
fn degrade<T>(operation: &str, result: Result<T>, fallback: T) -> Result<T> {
    match result {
        Err(err) if err.is_remote() => {
            tracing::error!(operation, error = %err, "remote call failed");
            Ok(fallback)
        }
        other => other,
    }
}
