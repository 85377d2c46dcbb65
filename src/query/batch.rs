//! Batch response aggregation
//!
//! A batch query runs several counter queries against the same fleet and
//! pools their results. The aggregator owns the fixed-up request: empty
//! correlation keys are filled with fresh unique ones, reserved parameters
//! are stripped, and every incoming batch response is folded in keyed by
//! `user_context`. Responses for unknown contexts are discarded.
//!
//! # Example
//!
//! ```rust
//! use fanout_metrics::query::{BatchQueryRequest, BatchResponseAggregator, CounterQuery};
//! use fanout_metrics::types::{ServerInfo, TieredRequest};
//!
//! let request = BatchQueryRequest {
//!     queries: vec![CounterQuery::new("/requests"), CounterQuery::new("/errors")],
//!     tiered_request: TieredRequest::new(vec![ServerInfo::new("m-01", 8080)]),
//! };
//!
//! let aggregator = BatchResponseAggregator::new(request).unwrap();
//! let response = aggregator.get_response();
//! assert_eq!(response.responses.len(), 2); // one per sub-query, even empty
//! ```

use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::query::response::{
    merge_samples, BatchQueryRequest, BatchQueryResponse, CounterQuery, CounterQueryResponse,
};
use crate::types::{RequestDetails, TieredRequest};

/// Accumulates batch query responses keyed by correlation context
pub struct BatchResponseAggregator {
    queries: Vec<CounterQuery>,
    tiered_request: TieredRequest,
    // Seeded with one empty response per sub-query; `contexts` preserves
    // the request order for `get_response`.
    responses: HashMap<String, CounterQueryResponse>,
    contexts: Vec<String>,
    request_details: Vec<RequestDetails>,
}

impl BatchResponseAggregator {
    /// Fix up `request` and seed the aggregate
    ///
    /// Rejects an empty batch. Every sub-query loses any `percentile`
    /// parameter (case-insensitive) and gains a fresh unique
    /// `user_context` when it carries none.
    pub fn new(mut request: BatchQueryRequest) -> Result<Self> {
        if request.queries.is_empty() {
            return Err(Error::InvalidArgument(
                "batch request must contain at least one query".to_string(),
            ));
        }

        let mut responses = HashMap::new();
        let mut contexts = Vec::with_capacity(request.queries.len());
        for query in &mut request.queries {
            query
                .query_params
                .retain(|key, _| !key.eq_ignore_ascii_case("percentile"));
            if query.user_context.is_empty() {
                query.user_context = Uuid::new_v4().to_string();
            }

            contexts.push(query.user_context.clone());
            responses.insert(
                query.user_context.clone(),
                CounterQueryResponse {
                    user_context: query.user_context.clone(),
                    ..Default::default()
                },
            );
        }

        Ok(Self {
            queries: request.queries,
            tiered_request: request.tiered_request,
            responses,
            contexts,
            request_details: Vec::new(),
        })
    }

    /// The fixed-up sub-queries
    pub fn queries(&self) -> &[CounterQuery] {
        &self.queries
    }

    /// The routing shared by every sub-query
    pub fn tiered_request(&self) -> &TieredRequest {
        &self.tiered_request
    }

    /// Fold one batch response into the aggregate
    ///
    /// The response's pooled accounting is appended; each sub-response is
    /// matched by `user_context` and its samples merged into the kept
    /// response. Unmatched sub-responses are dropped.
    pub fn add_response(&mut self, response: BatchQueryResponse) {
        self.request_details.extend(response.request_details);

        for sub in response.responses {
            match self.responses.get_mut(&sub.user_context) {
                Some(kept) => {
                    merge_samples(&mut kept.samples, sub.samples);
                    if kept.http_response_code == 0 {
                        kept.http_response_code = sub.http_response_code;
                    }
                    if kept.error_message.is_empty() {
                        kept.error_message = sub.error_message;
                    }
                }
                None => {
                    debug!(
                        user_context = %sub.user_context,
                        "discarding response for unknown counter"
                    );
                }
            }
        }
    }

    /// The aggregate so far: one response per requested sub-query, in
    /// request order, plus the pooled accounting
    pub fn get_response(&self) -> BatchQueryResponse {
        let responses = self
            .contexts
            .iter()
            .filter_map(|ctx| self.responses.get(ctx).cloned())
            .collect();
        BatchQueryResponse {
            responses,
            request_details: self.request_details.clone(),
        }
    }
}
