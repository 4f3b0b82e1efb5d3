use std::time::Duration;

use crate::config::{ServerConfig, UpstreamConfig};
use crate::error::RelayError;

use super::body::{from_reqwest, ReqwestBody, UpstreamResponse};

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
) -> Result<reqwest::Client, RelayError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|err| RelayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// HTTP client for the single configured upstream.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the underlying client cannot be built.
    pub fn new(server: &ServerConfig, upstream: &UpstreamConfig) -> Result<Self, RelayError> {
        let idle_timeout = (server.http_pool_idle_timeout_secs > 0)
            .then(|| Duration::from_secs(server.http_pool_idle_timeout_secs));
        let client = build_reqwest_client(
            server.http_pool_max_idle_per_host,
            idle_timeout,
            Duration::from_secs(server.timeout),
        )?;
        Ok(Self {
            client,
            base_url: upstream.base_url.trim_end_matches('/').to_owned(),
            api_key: upstream.api_key.clone(),
        })
    }

    /// Join the upstream base URL with a client request path.
    ///
    /// A base URL ending in `/v1` absorbs the `/v1` prefix of the path.
    #[must_use]
    pub fn upstream_url(&self, path: &str) -> String {
        let path = if self.base_url.ends_with("/v1") {
            path.strip_prefix("/v1").unwrap_or(path)
        } else {
            path
        };
        let mut url = String::with_capacity(self.base_url.len() + path.len());
        url.push_str(&self.base_url);
        url.push_str(path);
        url
    }

    /// POST a JSON body to `path` on the upstream.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the request cannot be sent.
    pub async fn post_json(
        &self,
        path: &str,
        body: bytes::Bytes,
    ) -> Result<UpstreamResponse<ReqwestBody>, RelayError> {
        let url = self.upstream_url(path);
        tracing::debug!(url = %url, bytes = body.len(), "forwarding request upstream");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| RelayError::Transport(format!("Upstream request failed: {err}")))?;
        Ok(from_reqwest(response))
    }
}
