use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    error::{Error, Result},
    http,
    retry::RetryPolicy,
};

const SERVICE: &str = "huggingface";

/// Turns text into dense vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the model producing the vectors.
    fn model_id(&self) -> &str;

    /// Embed a batch of documents, returning one vector per input in order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::remote(SERVICE, "no vector returned for query"))
    }
}

/// Sentence embeddings from the Hugging Face inference API.
///
/// Vectors are L2-normalized locally so dot-product similarity in the
/// vector index behaves like cosine similarity regardless of whether the
/// hosted pipeline normalizes.
pub struct HfInferenceEmbedder {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    model_id: String,
    dimension: usize,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct FeatureRequest<'a> {
    inputs: &'a [String],
    options: FeatureOptions,
}

#[derive(Serialize)]
struct FeatureOptions {
    wait_for_model: bool,
}

/// Sentence-transformer pipelines return one pooled vector per input; raw
/// encoder models return one vector per token.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeatureOutput {
    Pooled(Vec<Vec<f32>>),
    Tokens(Vec<Vec<Vec<f32>>>),
}

impl FeatureOutput {
    fn into_sentence_vectors(self) -> Vec<Vec<f32>> {
        match self {
            FeatureOutput::Pooled(vectors) => vectors,
            FeatureOutput::Tokens(batches) => {
                batches.iter().map(|tokens| mean_pool(tokens)).collect()
            }
        }
    }
}

impl HfInferenceEmbedder {
    /// Connect to the hosted model and learn its output dimension.
    ///
    /// A short probe is embedded up front so that a cold model is loaded
    /// before the first real request.
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut embedder = Self {
            client: http::client(config.request_timeout)?,
            url: format!(
                "{}/{}/pipeline/feature-extraction",
                http::base_url(&config.embedding_endpoint),
                config.embedding_model
            ),
            token: config.hf_token.clone(),
            model_id: config.embedding_model.clone(),
            dimension: 0,
            retry: config.retry,
        };

        let probe = embedder.embed_documents(&["warm up".to_string()]).await?;
        embedder.dimension = probe.first().map(Vec::len).unwrap_or(0);
        if embedder.dimension == 0 {
            return Err(Error::remote(SERVICE, "model returned an empty embedding"));
        }

        tracing::info!(
            model = %embedder.model_id,
            dimension = embedder.dimension,
            "connected to embedding model"
        );
        Ok(embedder)
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = FeatureRequest {
            inputs: texts,
            options: FeatureOptions {
                wait_for_model: true,
            },
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let output: FeatureOutput = http::send_json(SERVICE, request).await?;
        Ok(output.into_sentence_vectors())
    }
}

#[async_trait]
impl Embedder for HfInferenceEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = self
            .retry
            .run("embed", || self.request(texts))
            .await?;

        if vectors.len() != texts.len() {
            return Err(Error::remote(
                SERVICE,
                format!(
                    "expected {} embeddings, received {}",
                    texts.len(),
                    vectors.len()
                ),
            ));
        }
        if self.dimension > 0
            && let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension)
        {
            return Err(Error::remote(
                SERVICE,
                format!(
                    "expected {}-dimensional embeddings, received {}",
                    self.dimension,
                    bad.len()
                ),
            ));
        }

        for vector in &mut vectors {
            normalize(vector);
        }
        Ok(vectors)
    }
}

/// Scale `vector` to unit length. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

fn mean_pool(tokens: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = tokens.first() else {
        return Vec::new();
    };
    let mut pooled = vec![0.0; first.len()];
    for token in tokens {
        for (acc, value) in pooled.iter_mut().zip(token) {
            *acc += value;
        }
    }
    let count = tokens.len() as f32;
    for value in &mut pooled {
        *value /= count;
    }
    pooled
}
