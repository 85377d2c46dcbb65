//! Distributed counter querying
//!
//! This module provides the tiered fan-out client:
//! - Pure request planning ([`plan`]) that covers every source exactly once
//! - A pluggable HTTP transport seam ([`transport`]) for test injection
//! - The fan-out client itself ([`client`]) with per-server accounting
//! - Batch aggregation ([`batch`]) keyed by caller correlation context
//!
//! # Query Flow
//!
//! ```text
//! caller
//!   │ counter_query / counter_info_query / batch_query
//!   ▼
//! DistributedQueryClient ── plan_fanout ──▶ LeaderSlice per leader
//!   │ submit (concurrent, per-request budget)
//!   ▼
//! Requester ──▶ remote servers (which recurse with the same planner)
//!   │ responses + per-source RequestDetails
//!   ▼
//! merged samples + one RequestDetails entry per source
//! ```

pub mod batch;
pub mod client;
pub mod plan;
pub mod response;
pub mod transport;

pub use batch::BatchResponseAggregator;
pub use client::{DistributedQueryClient, QueryStats};
pub use plan::{plan_fanout, LeaderSlice};
pub use response::{
    merge_samples, BatchQueryRequest, BatchQueryResponse, CounterInfo, CounterInfoResponse,
    CounterQuery, CounterQueryResponse,
};
pub use transport::{
    HttpRequest, HttpRequesterFactory, HttpResponse, Requester, RequesterFactory,
};
