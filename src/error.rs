use std::{path::PathBuf, sync::Arc};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the retrieval core.
///
/// `Clone` so that a single failed registry initialization can be handed to
/// every caller that was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{service} request failed: {message}")]
    Remote {
        service: &'static str,
        message: String,
        retryable: bool,
    },

    #[error("encoder snapshot error: {0}")]
    Snapshot(String),

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl Error {
    /// A remote failure that is not worth retrying (bad request, bad
    /// credentials, malformed response).
    pub fn remote(service: &'static str, message: impl Into<String>) -> Self {
        Error::Remote {
            service,
            message: message.into(),
            retryable: false,
        }
    }

    /// Classify a transport-level `reqwest` failure.
    pub fn http(service: &'static str, err: reqwest::Error) -> Self {
        let retryable = err.is_timeout() || err.is_connect() || err.is_request();
        Error::Remote {
            service,
            message: err.to_string(),
            retryable,
        }
    }

    /// Classify a non-success HTTP status. Throttling and server-side
    /// failures are retryable, everything else is not.
    pub fn status(
        service: &'static str,
        status: reqwest::StatusCode,
        body: &str,
    ) -> Self {
        let retryable = status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error();
        let body = body.trim();
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", truncate(body, 300))
        };
        Error::Remote {
            service,
            message,
            retryable,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Remote { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Remote { retryable: true, .. })
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
