//! Lazily built, shared retrieval resources.
//!
//! The embedding model handle, the sparse encoder and the vector index
//! handle are expensive to create (remote warm-up, encoder fitting, index
//! host resolution), so a [`Registry`] builds them on first use and hands
//! out the same [`Resources`] afterwards. Initialization is single-flight:
//! concurrent callers share one attempt and all observe its outcome.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    config::Config,
    embedding::{Embedder, HfInferenceEmbedder},
    encoder_cache::SparseEncoderCache,
    error::{Error, Result},
    sparse::Bm25Encoder,
    vector_index::{PineconeIndex, VectorIndex},
};

/// The shared handles every retrieval and ingestion call needs.
pub struct Resources {
    pub embedder: Arc<dyn Embedder>,
    pub encoder: Arc<Bm25Encoder>,
    pub index: Arc<dyn VectorIndex>,
}

/// Creates the remote handles. Swapped out in tests.
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    async fn embedder(&self, config: &Config) -> Result<Arc<dyn Embedder>>;

    async fn index(
        &self,
        config: &Config,
        api_key: &str,
    ) -> Result<Arc<dyn VectorIndex>>;
}

/// Hugging Face inference for embeddings, Pinecone for the index.
pub struct HostedFactory;

#[async_trait]
impl ResourceFactory for HostedFactory {
    async fn embedder(&self, config: &Config) -> Result<Arc<dyn Embedder>> {
        Ok(Arc::new(HfInferenceEmbedder::connect(config).await?))
    }

    async fn index(
        &self,
        config: &Config,
        api_key: &str,
    ) -> Result<Arc<dyn VectorIndex>> {
        Ok(Arc::new(PineconeIndex::open(config, api_key).await?))
    }
}

type Outcome = Option<Result<Arc<Resources>>>;

enum Slot {
    Empty,
    Building(watch::Receiver<Outcome>),
    Ready(Arc<Resources>),
}

enum Step {
    Build(watch::Sender<Outcome>),
    Wait(watch::Receiver<Outcome>),
}

pub struct Registry {
    config: Config,
    factory: Arc<dyn ResourceFactory>,
    cache: SparseEncoderCache,
    slot: Mutex<Slot>,
}

impl Registry {
    pub fn new(
        config: Config,
        factory: Arc<dyn ResourceFactory>,
        cache: SparseEncoderCache,
    ) -> Self {
        Self {
            config,
            factory,
            cache,
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// A registry backed by the hosted services, caching the encoder at
    /// the configured snapshot path.
    pub fn hosted(config: Config) -> Self {
        let cache = SparseEncoderCache::new(config.encoder_snapshot.clone());
        Self::new(config, Arc::new(HostedFactory), cache)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn encoder_cache(&self) -> &SparseEncoderCache {
        &self.cache
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.lock(), Slot::Ready(_))
    }

    /// Return the shared resources, building them on first use.
    pub async fn get_or_init(&self) -> Result<Arc<Resources>> {
        loop {
            let step = {
                let mut slot = self.lock();
                let waiting = match &*slot {
                    Slot::Ready(resources) => return Ok(Arc::clone(resources)),
                    Slot::Building(rx) => Some(rx.clone()),
                    Slot::Empty => None,
                };
                match waiting {
                    Some(rx) => Step::Wait(rx),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        *slot = Slot::Building(rx);
                        Step::Build(tx)
                    }
                }
            };

            match step {
                Step::Build(tx) => return self.build_and_publish(tx).await,
                Step::Wait(mut rx) => {
                    let outcome = rx
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|seen| seen.clone());
                    if let Some(result) = outcome {
                        return result;
                    }
                    // The building caller went away; take another turn.
                }
            }
        }
    }

    async fn build_and_publish(
        &self,
        tx: watch::Sender<Outcome>,
    ) -> Result<Arc<Resources>> {
        let mut reset = ResetOnDrop {
            registry: self,
            armed: true,
        };
        let outcome = self.build().await.map(Arc::new);
        reset.armed = false;

        *self.lock() = match &outcome {
            Ok(resources) => Slot::Ready(Arc::clone(resources)),
            Err(_) => Slot::Empty,
        };
        tx.send_replace(Some(outcome.clone()));
        outcome
    }

    async fn build(&self) -> Result<Resources> {
        let api_key = self.config.require_api_key()?;
        if self.config.hf_token.is_none() {
            tracing::warn!(
                "HF_TOKEN is not set, embedding requests are unauthenticated \
                 and may be rate limited"
            );
        }

        let embedder = self.factory.embedder(&self.config).await?;

        let cache = self.cache.clone();
        let encoder = tokio::task::spawn_blocking(move || load_or_fit(&cache))
            .await
            .map_err(|err| {
                Error::Snapshot(format!("encoder preparation did not finish: {err}"))
            })?;

        let index = self.factory.index(&self.config, api_key).await?;

        tracing::info!(
            model = embedder.model_id(),
            index = index.name(),
            encoder_documents = encoder.doc_count(),
            "retrieval resources initialized"
        );

        Ok(Resources {
            embedder,
            encoder: Arc::new(encoder),
            index,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Load the cached encoder, or fit the default one and save it best effort.
fn load_or_fit(cache: &SparseEncoderCache) -> Bm25Encoder {
    if let Some(encoder) = cache.load_or_absent() {
        return encoder;
    }

    let encoder = Bm25Encoder::default_fitted();
    if let Err(err) = cache.save(&encoder) {
        tracing::warn!(
            path = %cache.path().display(),
            error = %err,
            "failed to save BM25 encoder snapshot"
        );
    }
    encoder
}

/// Puts the slot back to empty if an initialization future is dropped
/// before it finishes, so waiters can start over.
struct ResetOnDrop<'a> {
    registry: &'a Registry,
    armed: bool,
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("resource initialization cancelled");
            *self.registry.lock() = Slot::Empty;
        }
    }
}
