//! HTTP transport collaborator
//!
//! Every protocol stage talks to the provider through the [`HttpClient`]
//! trait rather than a concrete HTTP library.  Concrete implementations live
//! in submodules:
//!
//! - [`http::ReqwestHttpClient`] -- `reqwest`-backed client with a bounded
//!   per-request timeout and redirects disabled.
//! - [`fake::FakeHttpClient`] -- in-memory scripted client used in tests.
//!
//! The trait knows nothing about OAuth: a request goes out, a
//! status plus body comes back, or a [`TransportError`] is returned.  Status
//! interpretation belongs to the caller.

pub mod fake;
pub mod http;

use std::fmt;

use bytes::Bytes;
use url::Url;

use crate::error::TransportError;

pub use http::ReqwestHttpClient;

/// HTTP methods used by the relying party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

impl HttpMethod {
    /// Returns the method token as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method
    pub method: HttpMethod,
    /// Absolute target URL
    pub url: Url,
    /// Header name/value pairs, sent in order
    pub headers: Vec<(String, String)>,
    /// Request body, if any
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// Creates a `GET` request with no headers.
    pub fn get(url: Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Creates a `POST` request carrying `body` with the given content type.
    pub fn post(url: Url, content_type: &str, body: impl Into<Bytes>) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: Some(body.into()),
        }
    }

    /// Appends a header and returns the request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Looks up the first header named `name`, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// An HTTP response as seen by the protocol stages.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response header name/value pairs
    pub headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response with the given status and body and no headers.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Returns `true` for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Looks up the first header named `name`, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns the body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Abstraction over the HTTP transport used by every protocol stage.
///
/// Implementations must be safe to share across tasks; stages hold them as
/// `Arc<dyn HttpClient>`.
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync + fmt::Debug {
    /// Sends `request` and returns whatever status the server produced.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] when the bounded timeout elapses
    /// and [`TransportError::Network`] for every other failure that prevents
    /// a status from being received.  Non-2xx statuses are **not** errors at
    /// this layer.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}
