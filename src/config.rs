use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::{
    data_dir::DataDir,
    error::{Error, Result},
    retry::RetryPolicy,
};

pub const API_KEY_ENV_VAR: &str = "PINECONE_API_KEY";
pub const INDEX_ENV_VAR: &str = "PINECONE_INDEX";
pub const INDEX_HOST_ENV_VAR: &str = "PINECONE_INDEX_HOST";
pub const CONTROL_PLANE_ENV_VAR: &str = "PINECONE_CONTROL_PLANE";
pub const NAMESPACE_ENV_VAR: &str = "PINECONE_NAMESPACE";
pub const HF_TOKEN_ENV_VAR: &str = "HF_TOKEN";
pub const MODEL_ENV_VAR: &str = "SKILLSEARCH_EMBEDDING_MODEL";
pub const EMBEDDING_ENDPOINT_ENV_VAR: &str = "SKILLSEARCH_EMBEDDING_ENDPOINT";
pub const GOOGLE_API_KEY_ENV_VAR: &str = "GOOGLE_API_KEY";
pub const GENERATION_MODEL_ENV_VAR: &str = "SKILLSEARCH_GENERATION_MODEL";
pub const TOP_K_ENV_VAR: &str = "SKILLSEARCH_TOP_K";
pub const ALPHA_ENV_VAR: &str = "SKILLSEARCH_ALPHA";
pub const TIMEOUT_ENV_VAR: &str = "SKILLSEARCH_TIMEOUT_SECS";
pub const RETRIES_ENV_VAR: &str = "SKILLSEARCH_RETRIES";
pub const ENCODER_CACHE_ENV_VAR: &str = "SKILLSEARCH_ENCODER_CACHE";

pub const DEFAULT_INDEX_NAME: &str = "hybrid-search-langchain-pinecone";
pub const DEFAULT_CONTROL_PLANE: &str = "https://api.pinecone.io";
pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_EMBEDDING_ENDPOINT: &str =
    "https://router.huggingface.co/hf-inference/models";
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_HYBRID_TOP_K: usize = 4;
pub const DEFAULT_ALPHA: f32 = 0.5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Parameters of the hybrid (dense + sparse) search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridSettings {
    /// Number of matches requested from the index.
    pub top_k: usize,
    /// Weight of the dense vector; the sparse vector gets `1 - alpha`.
    pub alpha: f32,
}

impl Default for HybridSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_HYBRID_TOP_K,
            alpha: DEFAULT_ALPHA,
        }
    }
}

/// Runtime configuration, read once at startup.
///
/// Credentials are kept as options here; whether they are mandatory is
/// decided by the component that needs them, so a missing vector-database
/// key only fails when the registry is first initialized.
#[derive(Clone)]
pub struct Config {
    pub pinecone_api_key: Option<String>,
    pub index_name: String,
    pub index_host: Option<String>,
    pub control_plane_url: String,
    pub namespace: String,
    pub embedding_model: String,
    pub embedding_endpoint: String,
    pub hf_token: Option<String>,
    pub google_api_key: Option<String>,
    pub generation_model: String,
    pub encoder_snapshot: PathBuf,
    pub hybrid: HybridSettings,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Config {
    /// Configuration with every default and no credentials.
    pub fn new(encoder_snapshot: PathBuf) -> Self {
        Self {
            pinecone_api_key: None,
            index_name: DEFAULT_INDEX_NAME.to_string(),
            index_host: None,
            control_plane_url: DEFAULT_CONTROL_PLANE.to_string(),
            namespace: String::new(),
            embedding_model: DEFAULT_MODEL_ID.to_string(),
            embedding_endpoint: DEFAULT_EMBEDDING_ENDPOINT.to_string(),
            hf_token: None,
            google_api_key: None,
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            encoder_snapshot,
            hybrid: HybridSettings::default(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }

    /// Read configuration from the process environment.
    pub fn from_env(data_dir: &DataDir) -> Result<Self> {
        Self::from_lookup(data_dir, |key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(data_dir: &DataDir, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::new(
            get(ENCODER_CACHE_ENV_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.encoder_snapshot()),
        );

        config.pinecone_api_key = get(API_KEY_ENV_VAR);
        config.index_host = get(INDEX_HOST_ENV_VAR);
        config.hf_token = get(HF_TOKEN_ENV_VAR);
        config.google_api_key = get(GOOGLE_API_KEY_ENV_VAR);
        if let Some(name) = get(INDEX_ENV_VAR) {
            config.index_name = name;
        }
        if let Some(url) = get(CONTROL_PLANE_ENV_VAR) {
            config.control_plane_url = url;
        }
        if let Some(namespace) = lookup(NAMESPACE_ENV_VAR) {
            config.namespace = namespace.trim().to_string();
        }
        if let Some(model) = get(MODEL_ENV_VAR) {
            config.embedding_model = model;
        }
        if let Some(endpoint) = get(EMBEDDING_ENDPOINT_ENV_VAR) {
            config.embedding_endpoint = endpoint;
        }
        if let Some(model) = get(GENERATION_MODEL_ENV_VAR) {
            config.generation_model = model;
        }

        if let Some(top_k) = parse_var::<usize>(&get, TOP_K_ENV_VAR)? {
            if top_k == 0 {
                return Err(Error::Config(format!(
                    "{TOP_K_ENV_VAR} must be at least 1"
                )));
            }
            config.hybrid.top_k = top_k;
        }
        if let Some(alpha) = parse_var::<f32>(&get, ALPHA_ENV_VAR)? {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(Error::Config(format!(
                    "{ALPHA_ENV_VAR} must be between 0 and 1, got {alpha}"
                )));
            }
            config.hybrid.alpha = alpha;
        }
        if let Some(secs) = parse_var::<u64>(&get, TIMEOUT_ENV_VAR)? {
            config.request_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(attempts) = parse_var::<u32>(&get, RETRIES_ENV_VAR)? {
            config.retry = RetryPolicy::new(
                attempts,
                RetryPolicy::default().delay_for_attempt(1),
            );
        }

        Ok(config)
    }

    /// The vector-database credential, which registry initialization
    /// cannot proceed without.
    pub fn require_api_key(&self) -> Result<&str> {
        self.pinecone_api_key.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "{API_KEY_ENV_VAR} environment variable is required"
            ))
        })
    }
}

fn parse_var<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                Error::Config(format!("invalid value for {key} ({raw:?}): {e}"))
            })
        })
        .transpose()
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &Option<String>| s.as_ref().map(|_| "<redacted>");
        f.debug_struct("Config")
            .field("pinecone_api_key", &redact(&self.pinecone_api_key))
            .field("index_name", &self.index_name)
            .field("index_host", &self.index_host)
            .field("control_plane_url", &self.control_plane_url)
            .field("namespace", &self.namespace)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_endpoint", &self.embedding_endpoint)
            .field("hf_token", &redact(&self.hf_token))
            .field("google_api_key", &redact(&self.google_api_key))
            .field("generation_model", &self.generation_model)
            .field("encoder_snapshot", &self.encoder_snapshot)
            .field("hybrid", &self.hybrid)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}
