//! The remote vector index holding dense and sparse record vectors.
//!
//! [`VectorIndex`] is the seam the retrieval and ingestion paths talk to;
//! [`PineconeIndex`] implements it against the Pinecone data-plane REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    error::{Error, Result},
    http,
    retry::RetryPolicy,
    sparse::SparseVector,
};

const SERVICE: &str = "pinecone";
const API_VERSION: &str = "2025-01";

/// Free-form metadata stored alongside a record.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A similarity query against the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_vector: Option<SparseVector>,
    pub top_k: usize,
    pub include_metadata: bool,
    pub include_values: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl QueryRequest {
    /// A dense-only query returning metadata but not stored values.
    pub fn dense(vector: Vec<f32>, top_k: usize, namespace: &str) -> Self {
        Self {
            vector,
            sparse_vector: None,
            top_k,
            include_metadata: true,
            include_values: false,
            namespace: namespace.to_string(),
        }
    }

    /// Attach a sparse component. Empty sparse vectors are dropped, since
    /// the index rejects them.
    pub fn with_sparse(mut self, sparse: SparseVector) -> Self {
        self.sparse_vector = (!sparse.is_empty()).then_some(sparse);
        self
    }
}

/// One scored record returned by a query.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A record to write to the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_values: Option<SparseVector>,
    pub metadata: Metadata,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Name of the index, for logging.
    fn name(&self) -> &str;

    /// Return the best matches for `request`, highest score first.
    async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryMatch>>;

    /// Insert or overwrite `records`, returning how many were written.
    async fn upsert(&self, namespace: &str, records: &[VectorRecord])
    -> Result<usize>;
}

#[derive(Deserialize)]
struct DescribeIndexResponse {
    host: String,
    #[serde(default)]
    dimension: Option<usize>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    #[serde(skip_serializing_if = "is_blank")]
    namespace: &'a str,
}

fn is_blank(namespace: &&str) -> bool {
    namespace.is_empty()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

/// A Pinecone serverless or pod index reached over HTTPS.
pub struct PineconeIndex {
    client: reqwest::Client,
    name: String,
    host: String,
    api_key: String,
    retry: RetryPolicy,
}

impl PineconeIndex {
    /// Open the configured index.
    ///
    /// When no data-plane host is configured, the control plane is asked
    /// for it, which also verifies that the index exists and the key is
    /// accepted.
    pub async fn open(config: &Config, api_key: &str) -> Result<Self> {
        let client = http::client(config.request_timeout)?;

        let host = match &config.index_host {
            Some(host) => host.clone(),
            None => {
                let url = format!(
                    "{}/indexes/{}",
                    http::base_url(&config.control_plane_url),
                    config.index_name
                );
                let described: DescribeIndexResponse = config
                    .retry
                    .run("describe index", || {
                        http::send_json(
                            SERVICE,
                            with_headers(client.get(&url), api_key),
                        )
                    })
                    .await?;
                tracing::debug!(
                    index = %config.index_name,
                    host = %described.host,
                    dimension = ?described.dimension,
                    "resolved index host"
                );
                described.host
            }
        };

        let index = Self {
            client,
            name: config.index_name.clone(),
            host: normalize_host(&host),
            api_key: api_key.to_string(),
            retry: config.retry,
        };
        tracing::info!(index = %index.name, host = %index.host, "opened vector index");
        Ok(index)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryMatch>> {
        let url = format!("{}/query", self.host);
        let response: QueryResponse = self
            .retry
            .run("query", || {
                http::send_json(
                    SERVICE,
                    with_headers(self.client.post(&url), &self.api_key)
                        .json(request),
                )
            })
            .await?;
        Ok(response.matches)
    }

    async fn upsert(
        &self,
        namespace: &str,
        records: &[VectorRecord],
    ) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let url = format!("{}/vectors/upsert", self.host);
        let body = UpsertRequest {
            vectors: records,
            namespace,
        };
        let response: UpsertResponse = self
            .retry
            .run("upsert", || {
                http::send_json(
                    SERVICE,
                    with_headers(self.client.post(&url), &self.api_key)
                        .json(&body),
                )
            })
            .await?;

        if response.upserted_count != records.len() {
            return Err(Error::remote(
                SERVICE,
                format!(
                    "upserted {} of {} records",
                    response.upserted_count,
                    records.len()
                ),
            ));
        }
        Ok(response.upserted_count)
    }
}

fn with_headers(
    request: reqwest::RequestBuilder,
    api_key: &str,
) -> reqwest::RequestBuilder {
    request
        .header("Api-Key", api_key)
        .header("X-Pinecone-API-Version", API_VERSION)
}

/// Data-plane hosts are reported without a scheme.
fn normalize_host(host: &str) -> String {
    let host = http::base_url(host);
    if host.starts_with("https://") || host.starts_with("http://") {
        host
    } else {
        format!("https://{host}")
    }
}
