//! In-memory fake HTTP client for unit and integration tests
//!
//! [`FakeHttpClient`] replays scripted results in FIFO order and records
//! every request it receives, so tests can drive a protocol stage without a
//! network and then assert on exactly what was sent.
//!
//! # Example
//!
//! ```
//! use gettokens::oidc::transport::fake::FakeHttpClient;
//! use gettokens::oidc::transport::{HttpClient, HttpRequest, HttpResponse};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let fake = FakeHttpClient::new();
//! fake.push_response(HttpResponse::new(200, r#"{"ok":true}"#));
//!
//! let url = url::Url::parse("https://op.example/anything").unwrap();
//! let response = fake.send(HttpRequest::get(url)).await.unwrap();
//! assert_eq!(response.status, 200);
//! assert_eq!(fake.requests().len(), 1);
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{HttpClient, HttpRequest, HttpResponse};
use crate::error::TransportError;

type Scripted = Result<HttpResponse, TransportError>;

/// Scripted [`HttpClient`] for tests.
///
/// Clones share the same script and request log.
#[derive(Debug, Clone, Default)]
pub struct FakeHttpClient {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    log: Arc<Mutex<Vec<HttpRequest>>>,
}

impl FakeHttpClient {
    /// Creates a fake with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, response: HttpResponse) {
        self.push(Ok(response));
    }

    /// Queues a JSON response with the given status.
    pub fn push_json(&self, status: u16, body: serde_json::Value) {
        self.push_response(HttpResponse::new(status, body.to_string()));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: TransportError) {
        self.push(Err(error));
    }

    fn push(&self, item: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }

    /// Returns a copy of every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Returns the most recent request, if any.
    pub fn last_request(&self) -> Option<HttpRequest> {
        self.log.lock().ok().and_then(|log| log.last().cloned())
    }
}

#[async_trait::async_trait]
impl HttpClient for FakeHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.to_string();
        if let Ok(mut log) = self.log.lock() {
            log.push(request);
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| {
            Err(TransportError::Network {
                url,
                message: "no scripted response left".to_string(),
            })
        })
    }
}
