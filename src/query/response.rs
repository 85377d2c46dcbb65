//! Wire types for counter queries and their responses
//!
//! Everything here crosses the HTTP boundary as JSON. A response produced by
//! the client is handed to the caller, who owns it from then on.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{DataSample, RequestDetails, SampleKey, TieredRequest};

/// Response to one counter query, including per-server accounting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterQueryResponse {
    /// Merged samples from every successful server
    #[serde(default)]
    pub samples: Vec<DataSample>,

    /// One entry per server in the fan-out, each exactly once
    #[serde(default)]
    pub request_details: Vec<RequestDetails>,

    /// HTTP code the responding server attached, 0 when locally produced
    #[serde(default)]
    pub http_response_code: i16,

    /// Failure context, empty on success
    #[serde(default)]
    pub error_message: String,

    /// Correlation key echoed from the originating sub-query
    #[serde(default)]
    pub user_context: String,
}

/// Description of one counter, as returned by the info endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterInfo {
    /// Counter name
    pub name: String,

    /// Names of the dimensions the counter is keyed by
    #[serde(default)]
    pub dimensions: Vec<String>,
}

/// Response to a counter info query
///
/// Shares the fan-out and accounting machinery with
/// [`CounterQueryResponse`]; only the payload domain differs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterInfoResponse {
    /// Counters known to the queried servers, unioned by name
    #[serde(default)]
    pub counters: Vec<CounterInfo>,

    /// One entry per server in the fan-out, each exactly once
    #[serde(default)]
    pub request_details: Vec<RequestDetails>,

    /// HTTP code the responding server attached, 0 when locally produced
    #[serde(default)]
    pub http_response_code: i16,

    /// Failure context, empty on success
    #[serde(default)]
    pub error_message: String,

    /// Correlation key echoed from the originating sub-query
    #[serde(default)]
    pub user_context: String,
}

/// One sub-query inside a batch request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterQuery {
    /// Counter path; must be non-empty and begin with `/`
    pub counter_path: String,

    /// Query parameters forwarded on the URI
    #[serde(default)]
    pub query_params: HashMap<String, String>,

    /// Caller-supplied correlation key; filled in when empty
    #[serde(default)]
    pub user_context: String,
}

impl CounterQuery {
    /// Create a sub-query for `counter_path`
    pub fn new(counter_path: impl Into<String>) -> Self {
        Self {
            counter_path: counter_path.into(),
            query_params: HashMap::new(),
            user_context: String::new(),
        }
    }

    /// Attach a query parameter
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    /// Attach a correlation key
    pub fn with_user_context(mut self, user_context: impl Into<String>) -> Self {
        self.user_context = user_context.into();
        self
    }
}

/// A batch of counter queries sharing one fan-out topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchQueryRequest {
    /// The sub-queries; must be non-empty
    pub queries: Vec<CounterQuery>,

    /// Routing shared by every sub-query
    pub tiered_request: TieredRequest,
}

/// Responses to a batch of counter queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchQueryResponse {
    /// One response per sub-query
    #[serde(default)]
    pub responses: Vec<CounterQueryResponse>,

    /// Accounting pooled across sub-queries
    #[serde(default)]
    pub request_details: Vec<RequestDetails>,
}

/// Capability the generic fan-out path needs from a response type
///
/// Both counter queries and counter info queries carry per-server
/// accounting, so a single routine drives both; the payload merge is the
/// only difference.
pub(crate) trait FanoutResponse:
    Serialize + DeserializeOwned + Default + Send + 'static
{
    /// Endpoint suffix under the counter path (`query` or `info`)
    const ENDPOINT: &'static str;

    /// Per-server accounting carried by this response
    fn request_details(&self) -> &[RequestDetails];

    /// Mutable access to the per-server accounting
    fn request_details_mut(&mut self) -> &mut Vec<RequestDetails>;

    /// Failure context attached by a responding server
    fn error_message(&self) -> &str;

    /// Fold another response's payload into this one
    fn merge_payload(&mut self, other: Self);
}

impl FanoutResponse for CounterQueryResponse {
    const ENDPOINT: &'static str = "query";

    fn request_details(&self) -> &[RequestDetails] {
        &self.request_details
    }

    fn request_details_mut(&mut self) -> &mut Vec<RequestDetails> {
        &mut self.request_details
    }

    fn error_message(&self) -> &str {
        &self.error_message
    }

    fn merge_payload(&mut self, other: Self) {
        merge_samples(&mut self.samples, other.samples);
    }
}

impl FanoutResponse for CounterInfoResponse {
    const ENDPOINT: &'static str = "info";

    fn request_details(&self) -> &[RequestDetails] {
        &self.request_details
    }

    fn request_details_mut(&mut self) -> &mut Vec<RequestDetails> {
        &mut self.request_details
    }

    fn error_message(&self) -> &str {
        &self.error_message
    }

    fn merge_payload(&mut self, other: Self) {
        for counter in other.counters {
            if !self.counters.iter().any(|c| c.name == counter.name) {
                self.counters.push(counter);
            }
        }
    }
}

/// Merge `incoming` samples into `existing` by sample key
///
/// Samples covering the same time bucket with the same dimension assignment
/// fold together (hit counts add, histograms sum per bucket); everything
/// else appends. Merge order never matters because the value merge is
/// commutative and associative.
pub fn merge_samples(existing: &mut Vec<DataSample>, incoming: Vec<DataSample>) {
    for sample in incoming {
        let key: SampleKey = sample.key();
        match existing.iter_mut().find(|s| s.key() == key) {
            Some(slot) => {
                if !slot.value.merge(&sample.value) {
                    tracing::warn!(
                        start_ms = sample.start_ms,
                        end_ms = sample.end_ms,
                        "dropping sample with mismatched value kind"
                    );
                }
            }
            None => existing.push(sample),
        }
    }
}
