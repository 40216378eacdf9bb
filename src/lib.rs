//! skillsearch - hybrid dense + BM25 keyword retrieval over a hosted vector
//! index.
//!
//! Texts are embedded with a hosted sentence-embedding model and encoded
//! with a locally fitted BM25 encoder, then stored in a Pinecone index.
//! Retrieval combines both signals (hybrid search) or uses the dense vector
//! alone (direct keyword queries). The shared handles are built lazily, once,
//! by a [`Registry`].
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use skillsearch::{Config, DataDir, Registry, SearchService};
//!
//! # async fn run() -> skillsearch::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let config = Config::from_env(&data_dir)?;
//! let service = SearchService::new(Arc::new(Registry::hosted(config)));
//!
//! service
//!     .upsert(&["guitar chords for beginners".to_string()])
//!     .await?;
//! for text in service.retrieve(&["learn guitar".to_string()]).await? {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data_dir;
pub mod direct;
pub mod doc_id;
pub mod embedding;
pub mod encoder_cache;
pub mod error;
mod http;
pub mod ingestion;
pub mod keywords;
pub mod metadata;
pub mod registry;
pub mod retry;
pub mod search;
pub mod service;
pub mod sparse;
pub mod validate;
pub mod vector_index;

pub use config::Config;
pub use data_dir::DataDir;
pub use doc_id::RecordId;
pub use embedding::Embedder;
pub use encoder_cache::SparseEncoderCache;
pub use error::{Error, Result};
pub use registry::{Registry, ResourceFactory, Resources};
pub use service::SearchService;
pub use sparse::{Bm25Encoder, SparseVector};
pub use vector_index::VectorIndex;
