//! Distributed query client
//!
//! Issues one fan-out cycle per query: plan the tier, contact each leader
//! concurrently under the per-request budget, fold partial responses into a
//! single response with exactly one [`RequestDetails`] entry per source.
//!
//! The client is total with respect to remote failures: every transport
//! failure becomes a status on the affected server's entry and the call
//! still returns a response. Only argument errors and truly unexpected
//! failures (task panics) escape.
//!
//! # Example
//!
//! ```rust,no_run
//! use fanout_metrics::query::{DistributedQueryClient, HttpRequesterFactory};
//! use fanout_metrics::types::{ServerInfo, TieredRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> fanout_metrics::Result<()> {
//! let client = DistributedQueryClient::new(&HttpRequesterFactory::default());
//! let request = TieredRequest::new(vec![
//!     ServerInfo::new("metrics-01", 8080),
//!     ServerInfo::new("metrics-02", 8080),
//! ]);
//!
//! let response = client
//!     .counter_query("/requests", request, None, &CancellationToken::new())
//!     .await?;
//! println!("{} samples", response.samples.len());
//! # Ok(())
//! # }
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result, TransportError};
use crate::query::batch::BatchResponseAggregator;
use crate::query::plan::plan_fanout;
use crate::query::response::{
    BatchQueryRequest, BatchQueryResponse, CounterInfoResponse, CounterQueryResponse,
    FanoutResponse,
};
use crate::query::transport::{
    HttpRequest, HttpRequesterFactory, HttpResponse, Requester, RequesterFactory,
};
use crate::types::{RequestDetails, RequestStatus, ServerInfo, TieredRequest};

/// Counters describing a client's lifetime activity
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryStats {
    /// Counter queries issued
    pub counter_queries: u64,
    /// Counter info queries issued
    pub info_queries: u64,
    /// Batch queries issued
    pub batch_queries: u64,
    /// Leader requests submitted across all queries
    pub leader_requests: u64,
    /// Leader requests that timed out or were cancelled
    pub leader_timeouts: u64,
    /// Leader requests that failed any other way
    pub leader_failures: u64,
}

/// Client that fans a counter query out across a server fleet
pub struct DistributedQueryClient {
    requester: Arc<dyn Requester>,
    config: ClientConfig,
    stats: Mutex<QueryStats>,
}

impl DistributedQueryClient {
    /// Create a client with default configuration
    ///
    /// The factory is consulted once; the produced requester serves every
    /// query this client issues.
    pub fn new(factory: &dyn RequesterFactory) -> Self {
        Self {
            requester: factory.create(),
            config: ClientConfig::default(),
            stats: Mutex::new(QueryStats::default()),
        }
    }

    /// Create a client with explicit configuration
    ///
    /// Requests that leave their routing fields unset take this
    /// configuration's defaults.
    pub fn with_config(factory: &dyn RequesterFactory, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            requester: factory.create(),
            config,
            stats: Mutex::new(QueryStats::default()),
        })
    }

    /// Create a client over the default HTTP transport
    ///
    /// The configuration's `user_agent` is threaded into the transport;
    /// use [`with_config`](Self::with_config) to supply a custom factory.
    pub fn with_default_transport(config: ClientConfig) -> Result<Self> {
        let factory = HttpRequesterFactory::new(config.user_agent.clone());
        Self::with_config(&factory, config)
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Snapshot of this client's activity counters
    pub fn stats(&self) -> QueryStats {
        *self.stats.lock()
    }

    /// Query counter data from every source in `request`
    ///
    /// `counter_path` must be non-empty and begin with `/`. `query_params`
    /// become the URI query string, minus any `percentile` key
    /// (case-insensitive). Cancelling `cancel` makes outstanding leaders
    /// report [`RequestStatus::TimedOut`].
    pub async fn counter_query(
        &self,
        counter_path: &str,
        request: TieredRequest,
        query_params: Option<&HashMap<String, String>>,
        cancel: &CancellationToken,
    ) -> Result<CounterQueryResponse> {
        self.stats.lock().counter_queries += 1;
        self.fan_out::<CounterQueryResponse>(counter_path, request, query_params, cancel)
            .await
    }

    /// Query counter descriptions from every source in `request`
    ///
    /// Same fan-out and accounting as [`counter_query`](Self::counter_query);
    /// the payload is the union of counters the servers report.
    pub async fn counter_info_query(
        &self,
        counter_path: &str,
        request: TieredRequest,
        query_params: Option<&HashMap<String, String>>,
        cancel: &CancellationToken,
    ) -> Result<CounterInfoResponse> {
        self.stats.lock().info_queries += 1;
        self.fan_out::<CounterInfoResponse>(counter_path, request, query_params, cancel)
            .await
    }

    /// Run every sub-query of `request` and aggregate the results
    ///
    /// Sub-queries run sequentially; each one fans out on its own. The
    /// returned batch has one response per sub-query even when a counter
    /// produced no data.
    pub async fn batch_query(
        &self,
        request: BatchQueryRequest,
        cancel: &CancellationToken,
    ) -> Result<BatchQueryResponse> {
        self.stats.lock().batch_queries += 1;
        let mut aggregator = BatchResponseAggregator::new(request)?;

        let queries = aggregator.queries().to_vec();
        let tiered_request = aggregator.tiered_request().clone();
        for query in queries {
            let mut response = self
                .counter_query(
                    &query.counter_path,
                    tiered_request.clone(),
                    Some(&query.query_params),
                    cancel,
                )
                .await?;
            response.user_context = query.user_context.clone();

            let details = std::mem::take(&mut response.request_details);
            aggregator.add_response(BatchQueryResponse {
                responses: vec![response],
                request_details: details,
            });
        }

        Ok(aggregator.get_response())
    }

    // One complete fan-out cycle, shared by the query and info paths.
    async fn fan_out<R: FanoutResponse>(
        &self,
        counter_path: &str,
        request: TieredRequest,
        query_params: Option<&HashMap<String, String>>,
        cancel: &CancellationToken,
    ) -> Result<R> {
        validate_counter_path(counter_path)?;
        request.validate()?;
        if let Some(params) = query_params {
            if params.keys().any(|k| k.is_empty()) {
                return Err(Error::InvalidArgument(
                    "query parameter names must be non-empty".to_string(),
                ));
            }
        }

        // Unset routing fields resolve to this client's configured
        // defaults; delegated sub-requests always carry the resolved
        // values.
        let max_fanout = request.max_fanout.unwrap_or(self.config.max_fanout);
        let fanout_timeout_ms = request
            .fanout_timeout_ms
            .unwrap_or(self.config.fanout_timeout_ms);
        let include_request_diagnostics = request
            .include_request_diagnostics
            .unwrap_or(self.config.include_request_diagnostics);

        let slices = plan_fanout(&request.sources, max_fanout)?;
        debug!(
            path = counter_path,
            sources = request.sources.len(),
            leaders = slices.len(),
            max_fanout,
            "fanning out"
        );

        // Every source starts as a federation error; leaders overwrite
        // their own slot, and successful leaders report for their
        // delegates.
        let mut details: HashMap<ServerInfo, RequestDetails> = request
            .sources
            .iter()
            .map(|s| (s.clone(), RequestDetails::federation(s.clone())))
            .collect();

        let budget = Duration::from_millis(u64::from(fanout_timeout_ms));
        let mut join_set: JoinSet<(ServerInfo, std::result::Result<HttpResponse, TransportError>)> =
            JoinSet::new();

        for slice in &slices {
            let requester = Arc::clone(&self.requester);
            let uri = build_uri(&slice.leader, counter_path, R::ENDPOINT, query_params);
            let delegated_request = TieredRequest {
                sources: slice.delegated.clone(),
                max_fanout: Some(max_fanout),
                fanout_timeout_ms: Some(fanout_timeout_ms),
                include_request_diagnostics: Some(include_request_diagnostics),
                inner_payload: request.inner_payload.clone(),
            };
            let body = serde_json::to_vec(&delegated_request)
                .map_err(|e| Error::InvalidArgument(format!("unserializable request: {e}")))?;
            let leader = slice.leader.clone();
            let cancel = cancel.clone();

            self.stats.lock().leader_requests += 1;
            join_set.spawn(async move {
                let http_request = HttpRequest {
                    uri,
                    body,
                    timeout: budget,
                };
                let outcome = tokio::select! {
                    // Cancellation wins any tie; a cancelled fan-out must
                    // never settle a leader as successful.
                    biased;
                    _ = cancel.cancelled() => Err(TransportError::Timeout),
                    submitted = tokio::time::timeout(budget, requester.submit(http_request)) => {
                        match submitted {
                            Ok(inner) => inner,
                            Err(_) => Err(TransportError::Timeout),
                        }
                    }
                };
                (leader, outcome)
            });
        }

        let mut aggregate = R::default();
        while let Some(joined) = join_set.join_next().await {
            let (leader, outcome) = match joined {
                Ok(pair) => pair,
                // A panicked leader task is an unexpected error; surface it
                // unchanged rather than absorbing it into a status.
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => continue,
            };
            self.settle_leader(leader, outcome, &mut details, &mut aggregate);
        }

        let mut all_details: Vec<RequestDetails> = details.into_values().collect();
        all_details.sort_by(|a, b| {
            (&a.server.hostname, a.server.port).cmp(&(&b.server.hostname, b.server.port))
        });
        *aggregate.request_details_mut() = all_details;
        Ok(aggregate)
    }

    // Fold one leader's outcome into the accounting map and the aggregate
    // payload. Each leader settles exactly once.
    fn settle_leader<R: FanoutResponse>(
        &self,
        leader: ServerInfo,
        outcome: std::result::Result<HttpResponse, TransportError>,
        details: &mut HashMap<ServerInfo, RequestDetails>,
        aggregate: &mut R,
    ) {
        match outcome {
            Ok(response) if response.is_success() => {
                match serde_json::from_slice::<R>(&response.body) {
                    Ok(parsed) => {
                        let code = response.status as i16;
                        adopt_reported_details(details, &leader, parsed.request_details());
                        details.insert(leader.clone(), RequestDetails::success(leader, code));
                        aggregate.merge_payload(parsed);
                    }
                    Err(e) => {
                        // 2xx with an undecodable body is a transport-level
                        // failure, not a server-reported one.
                        self.stats.lock().leader_failures += 1;
                        warn!(server = %leader, error = %e, "invalid body from leader");
                        let detail =
                            RequestDetails::new(leader.clone(), RequestStatus::RequestException)
                                .with_code(response.status as i16)
                                .with_message(format!("invalid response body: {e}"));
                        details.insert(leader, detail);
                    }
                }
            }
            Ok(response) => {
                self.stats.lock().leader_failures += 1;
                let code = response.status as i16;
                let mut detail =
                    RequestDetails::new(leader.clone(), RequestStatus::ServerFailureResponse)
                        .with_code(code);
                // A well-formed failure body still reports on delegated
                // sources; without one their placeholders stand.
                if let Ok(parsed) = serde_json::from_slice::<R>(&response.body) {
                    adopt_reported_details(details, &leader, parsed.request_details());
                    detail = detail.with_message(parsed.error_message().to_string());
                }
                warn!(server = %leader, code, "failure response from leader");
                details.insert(leader, detail);
            }
            Err(TransportError::Timeout) => {
                self.stats.lock().leader_timeouts += 1;
                warn!(server = %leader, "leader timed out");
                let detail = RequestDetails::new(leader.clone(), RequestStatus::TimedOut)
                    .with_message(TransportError::Timeout.to_string());
                details.insert(leader, detail);
            }
            Err(e) => {
                self.stats.lock().leader_failures += 1;
                warn!(server = %leader, error = %e, "transport failure to leader");
                let detail = RequestDetails::new(leader.clone(), RequestStatus::RequestException)
                    .with_message(e.to_string());
                details.insert(leader, detail);
            }
        }
    }
}

// Take over the entries a leader reported for its delegates. Slots are
// write-once: only untouched federation placeholders accept a report, and
// servers outside this fan-out are ignored.
fn adopt_reported_details(
    details: &mut HashMap<ServerInfo, RequestDetails>,
    leader: &ServerInfo,
    reported: &[RequestDetails],
) {
    for entry in reported {
        if entry.server == *leader {
            continue;
        }
        if let Some(slot) = details.get_mut(&entry.server) {
            if slot.status == RequestStatus::FederationError {
                *slot = entry.clone();
            }
        }
    }
}

fn validate_counter_path(counter_path: &str) -> Result<()> {
    if counter_path.is_empty() {
        return Err(Error::InvalidArgument(
            "counter path must be non-empty".to_string(),
        ));
    }
    if !counter_path.starts_with('/') {
        return Err(Error::InvalidArgument(
            "counter path must begin with '/'".to_string(),
        ));
    }
    Ok(())
}

// `http://{host}:{port}/counters{path}/{endpoint}`, plus a query string
// when any non-reserved parameter survives filtering.
pub(crate) fn build_uri(
    server: &ServerInfo,
    counter_path: &str,
    endpoint: &str,
    query_params: Option<&HashMap<String, String>>,
) -> String {
    let mut uri = format!(
        "http://{}:{}/counters{}/{}",
        server.hostname, server.port, counter_path, endpoint
    );
    if let Some(params) = query_params {
        let mut pairs: Vec<(&String, &String)> = params
            .iter()
            .filter(|(key, _)| !key.eq_ignore_ascii_case("percentile"))
            .collect();
        pairs.sort();
        if !pairs.is_empty() {
            let query: Vec<String> = pairs
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            uri.push('?');
            uri.push_str(&query.join("&"));
        }
    }
    uri
}
