use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Build the HTTP client shared by a remote backend.
pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}

/// Send `request` and decode a JSON body, mapping transport failures,
/// non-success statuses and undecodable bodies onto [`Error::Remote`].
pub(crate) async fn send_json<T: DeserializeOwned>(
    service: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T> {
    let response = request.send().await.map_err(|e| Error::http(service, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::status(service, status, &body));
    }

    response.json::<T>().await.map_err(|e| {
        Error::remote(service, format!("malformed response body: {e}"))
    })
}

/// Strip trailing slashes so paths can be appended with `format!`.
pub(crate) fn base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
