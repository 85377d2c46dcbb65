//! Distributed counter metrics: tiered query fan-out and persisted data
//!
//! This library provides the two halves of a distributed metrics system's
//! client side:
//! - A tiered query fan-out client that covers a server fleet with bounded
//!   concurrency, per-request timeouts, and deterministic per-server status
//!   accounting under partial failure
//! - A persisted-data codec that round-trips dimensional counter and
//!   histogram data through a versioned binary record format, including
//!   legacy format upgrade

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod data;
pub mod dimensions;
pub mod error;
pub mod persist;
pub mod pool;
pub mod query;
pub mod types;

// Re-export main types
pub use config::ClientConfig;
pub use data::{Histogram, HitCount, KeyedDataStore};
pub use dimensions::{DimensionSet, DimensionSpecification};
pub use error::{Error, PersistedDataError, Result};
pub use persist::{PersistedDataReader, PersistedDataWriter};
pub use query::{CounterQueryResponse, DistributedQueryClient};
pub use types::{RequestDetails, RequestStatus, ServerInfo, TieredRequest};
