//! HTTP requester abstraction
//!
//! The query client talks to servers through the [`Requester`] seam: one
//! operation, submit a request and get back a response or a
//! [`TransportError`]. Clients hold a requester produced by a
//! [`RequesterFactory`] passed at construction, so tests wrap or replace
//! the default with a mock instead of mutating process-wide state.
//!
//! Only transport conditions are folded into [`TransportError`]; anything
//! unexpected propagates to the caller unchanged.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;

/// One outbound HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Fully-formed request URI
    pub uri: String,

    /// Serialised request body
    pub body: Vec<u8>,

    /// Budget for this single request
    pub timeout: Duration,
}

/// One HTTP response, body undecoded
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,

    /// Raw response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Submits one request and reports the outcome
#[async_trait]
pub trait Requester: Send + Sync {
    /// Submit `request`, returning the response or the transport failure
    async fn submit(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Produces the requester a client will use for its lifetime
pub trait RequesterFactory: Send + Sync {
    /// Create a requester
    fn create(&self) -> Arc<dyn Requester>;
}

/// Default factory backed by [`reqwest`]
#[derive(Debug, Clone)]
pub struct HttpRequesterFactory {
    user_agent: String,
}

impl HttpRequesterFactory {
    /// Create a factory producing requesters with the given user agent
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

impl Default for HttpRequesterFactory {
    fn default() -> Self {
        Self::new(crate::config::ClientConfig::default().user_agent)
    }
}

impl RequesterFactory for HttpRequesterFactory {
    fn create(&self) -> Arc<dyn Requester> {
        let client = reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .build()
            .unwrap_or_default();
        Arc::new(ReqwestRequester { client })
    }
}

struct ReqwestRequester {
    client: reqwest::Client,
}

#[async_trait]
impl Requester for ReqwestRequester {
    async fn submit(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(&request.uri)
            .timeout(request.timeout)
            .body(request.body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(map_reqwest_error)?
            .to_vec();

        Ok(HttpResponse { status, body })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::ConnectionClosed
    } else if e.is_body() || e.is_decode() {
        TransportError::InvalidBody(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}
