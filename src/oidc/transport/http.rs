//! `reqwest`-backed implementation of [`HttpClient`]
//!
//! Each request carries the configured timeout.  Redirects are never
//! followed, so a 3xx from a discovery or token endpoint reaches the caller
//! as a status and is rejected there.

use std::time::Duration;

use anyhow::Context;

use super::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::error::{Result, TransportError};

/// Default per-request timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Production HTTP client.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use gettokens::oidc::transport::ReqwestHttpClient;
///
/// let client = ReqwestHttpClient::new(Duration::from_secs(10)).unwrap();
/// assert_eq!(client.timeout(), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
    timeout: Duration,
}

impl ReqwestHttpClient {
    /// Builds a client whose requests fail with
    /// [`TransportError::Timeout`] after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("gettokens/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { inner, timeout })
    }

    /// The configured per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let url = request.url.to_string();
        let mut builder = match request.method {
            HttpMethod::Get => self.inner.get(request.url),
            HttpMethod::Post => self.inner.post(request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        tracing::debug!(method = %request.method, url = %url, "sending request");

        let response = builder
            .send()
            .await
            .map_err(|e| classify(&url, e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| classify(&url, e))?;

        tracing::debug!(url = %url, status, bytes = body.len(), "received response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify(url: &str, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_records_timeout() {
        let client = ReqwestHttpClient::new(Duration::from_millis(250)).unwrap();
        assert_eq!(client.timeout(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let client = ReqwestHttpClient::new(Duration::from_secs(2)).unwrap();
        // Port 9 (discard) on localhost is essentially never listening.
        let url = url::Url::parse("http://127.0.0.1:9/.well-known/openid-configuration").unwrap();
        let err = client.send(HttpRequest::get(url)).await.unwrap_err();
        assert!(
            matches!(err, TransportError::Network { .. }),
            "expected network error, got {err:?}"
        );
    }
}
