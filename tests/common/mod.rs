//! Shared test fixtures: a scriptable requester injected through the
//! factory seam, plus fleet helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use fanout_metrics::error::TransportError;
use fanout_metrics::query::{HttpRequest, HttpResponse, Requester, RequesterFactory};
use fanout_metrics::types::ServerInfo;

type Handler =
    dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static;

/// Requester driven by a closure; records every submitted request.
pub struct MockRequester {
    handler: Box<Handler>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockRequester {
    /// Every request submitted so far, in arrival order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Requester for MockRequester {
    async fn submit(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        (self.handler)(&request)
    }
}

/// Factory handing out one shared [`MockRequester`].
pub struct MockFactory {
    requester: Arc<MockRequester>,
}

impl MockFactory {
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            requester: Arc::new(MockRequester {
                handler: Box::new(handler),
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The shared requester, for inspecting recorded requests.
    pub fn requester(&self) -> Arc<MockRequester> {
        Arc::clone(&self.requester)
    }
}

impl RequesterFactory for MockFactory {
    fn create(&self) -> Arc<dyn Requester> {
        Arc::clone(&self.requester) as Arc<dyn Requester>
    }
}

/// A fleet of `n` servers named `a`, `b`, `c`, ...
pub fn lettered_sources(n: usize) -> Vec<ServerInfo> {
    (0..n)
        .map(|i| {
            let name = char::from(b'a' + i as u8).to_string();
            ServerInfo::new(name, 8080)
        })
        .collect()
}

/// Serialize `body` as the JSON payload of an HTTP response.
pub fn json_response<T: Serialize>(status: u16, body: &T) -> HttpResponse {
    HttpResponse {
        status,
        body: serde_json::to_vec(body).expect("serializable body"),
    }
}
