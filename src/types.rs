//! Core data types used throughout the distributed metrics system
//!
//! # Key Types
//!
//! - **`ServerInfo`**: identity of one metric server (hostname + port)
//! - **`RequestStatus`** / **`RequestDetails`**: per-server outcome accounting
//!   for a fan-out query
//! - **`TieredRequest`**: one fan-out cycle's worth of routing state
//! - **`DataSample`** / **`SampleValue`**: one time-bucketed counter
//!   observation as it travels between servers
//!
//! # Example
//!
//! ```rust
//! use fanout_metrics::types::{ServerInfo, RequestDetails, RequestStatus};
//!
//! let server = ServerInfo::new("metrics-01", 8080);
//! let details = RequestDetails::federation(server.clone());
//! assert_eq!(details.status, RequestStatus::FederationError);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::dimensions::DimensionSpecification;

/// Identity of one metric server
///
/// Equality is structural; `ServerInfo` is used as the key in per-source
/// status accounting, so two values naming the same endpoint are the same
/// server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Host name or address; must be non-empty
    pub hostname: String,

    /// TCP port the counter endpoints listen on
    pub port: u16,
}

impl ServerInfo {
    /// Create a new server identity
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    /// Check the structural constraints on this identity
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.hostname.is_empty() {
            return Err(crate::error::Error::InvalidArgument(
                "server hostname must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// Terminal outcome recorded for one server in a fan-out
///
/// Each leader slot moves `Pending -> terminal` exactly once; sub-sources
/// keep [`RequestStatus::FederationError`] until a leader reports on their
/// behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    /// The server answered with a well-formed 2xx response
    Success,

    /// The request did not complete within the fan-out budget
    TimedOut,

    /// The server answered with a non-2xx HTTP response
    ServerFailureResponse,

    /// A transport-level failure other than a timeout occurred
    RequestException,

    /// Outcome unknown: an upstream leader failed before reporting
    FederationError,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Success => write!(f, "success"),
            RequestStatus::TimedOut => write!(f, "timed_out"),
            RequestStatus::ServerFailureResponse => write!(f, "server_failure_response"),
            RequestStatus::RequestException => write!(f, "request_exception"),
            RequestStatus::FederationError => write!(f, "federation_error"),
        }
    }
}

/// Outcome record for one server contacted (or delegated) during a fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetails {
    /// The server this record describes
    pub server: ServerInfo,

    /// Terminal status for this server
    pub status: RequestStatus,

    /// HTTP status code observed, or 0 when no response arrived
    pub http_response_code: i16,

    /// Human-readable context for failures; empty on success
    pub message: String,
}

impl RequestDetails {
    /// Create a record with an explicit status and no response code
    pub fn new(server: ServerInfo, status: RequestStatus) -> Self {
        Self {
            server,
            status,
            http_response_code: 0,
            message: String::new(),
        }
    }

    /// Placeholder for a server whose outcome is not yet known
    pub fn federation(server: ServerInfo) -> Self {
        Self::new(server, RequestStatus::FederationError)
    }

    /// Record for a server that answered successfully
    pub fn success(server: ServerInfo, http_response_code: i16) -> Self {
        Self {
            server,
            status: RequestStatus::Success,
            http_response_code,
            message: String::new(),
        }
    }

    /// Attach a failure message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attach an HTTP status code
    pub fn with_code(mut self, code: i16) -> Self {
        self.http_response_code = code;
        self
    }
}

/// Routing state for one fan-out cycle
///
/// A `TieredRequest` exists only for the duration of a single fan-out: the
/// client plans it, delegates slices of `sources` to leaders, and discards
/// it once every leader slot reaches a terminal status.
///
/// The tuning fields are overrides. A request that leaves them unset takes
/// the defaults of the [`ClientConfig`](crate::config::ClientConfig) the
/// issuing client was built with; requests delegated to leaders always
/// carry the resolved values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredRequest {
    /// Servers this request must cover, each exactly once
    pub sources: Vec<ServerInfo>,

    /// Maximum number of servers contacted directly at each tier; unset
    /// means the issuing client's configured default
    #[serde(default)]
    pub max_fanout: Option<u32>,

    /// Budget for any single leader request, in milliseconds; unset means
    /// the issuing client's configured default
    #[serde(default)]
    pub fanout_timeout_ms: Option<u32>,

    /// Ask leaders to include per-source diagnostics in their responses;
    /// unset means the issuing client's configured default
    #[serde(default)]
    pub include_request_diagnostics: Option<bool>,

    /// Opaque payload forwarded unchanged to every tier
    #[serde(default)]
    pub inner_payload: serde_json::Value,
}

impl TieredRequest {
    /// Create a request over `sources`, deferring the routing parameters
    /// to the issuing client's configuration
    pub fn new(sources: Vec<ServerInfo>) -> Self {
        Self {
            sources,
            max_fanout: None,
            fanout_timeout_ms: None,
            include_request_diagnostics: None,
            inner_payload: serde_json::Value::Null,
        }
    }

    /// Override the per-tier fan-out width
    pub fn with_max_fanout(mut self, max_fanout: u32) -> Self {
        self.max_fanout = Some(max_fanout);
        self
    }

    /// Override the per-request budget in milliseconds
    pub fn with_timeout_ms(mut self, fanout_timeout_ms: u32) -> Self {
        self.fanout_timeout_ms = Some(fanout_timeout_ms);
        self
    }

    /// Override the per-source diagnostics flag
    pub fn with_diagnostics(mut self, include: bool) -> Self {
        self.include_request_diagnostics = Some(include);
        self
    }

    /// Check the structural constraints on this request
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.max_fanout == Some(0) {
            return Err(crate::error::Error::InvalidArgument(
                "max_fanout must be greater than zero".to_string(),
            ));
        }
        if self.fanout_timeout_ms == Some(0) {
            return Err(crate::error::Error::InvalidArgument(
                "fanout_timeout_ms must be greater than zero".to_string(),
            ));
        }
        for source in &self.sources {
            source.validate()?;
        }
        Ok(())
    }
}

/// Value carried by one sample
///
/// The two counter kinds merge differently: hit counts add, histograms sum
/// per bucket. Absent samples are treated as zero on either side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleValue {
    /// Plain event count
    HitCount {
        /// Number of observed hits
        hits: u64,
    },

    /// Bucketed distribution
    Histogram {
        /// Bucket key to observation count
        buckets: BTreeMap<i64, u64>,
    },
}

impl SampleValue {
    /// Merge another value of the same kind into this one
    ///
    /// Mismatched kinds leave `self` unchanged; the caller decides whether
    /// that is worth logging.
    pub fn merge(&mut self, other: &SampleValue) -> bool {
        match (self, other) {
            (SampleValue::HitCount { hits }, SampleValue::HitCount { hits: other_hits }) => {
                *hits = hits.saturating_add(*other_hits);
                true
            }
            (
                SampleValue::Histogram { buckets },
                SampleValue::Histogram {
                    buckets: other_buckets,
                },
            ) => {
                for (key, count) in other_buckets {
                    let slot = buckets.entry(*key).or_insert(0);
                    *slot = slot.saturating_add(*count);
                }
                true
            }
            _ => false,
        }
    }
}

/// Identity of a sample within one counter's response
///
/// Two samples merge iff they cover the same time bucket with the same
/// dimension assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleKey {
    /// Bucket start, milliseconds since epoch
    pub start_ms: i64,
    /// Bucket end, milliseconds since epoch
    pub end_ms: i64,
    /// Dimension assignment for this sample
    pub dimensions: DimensionSpecification,
}

/// One time-bucketed observation of a counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSample {
    /// Bucket start, milliseconds since epoch
    pub start_ms: i64,

    /// Bucket end, milliseconds since epoch
    pub end_ms: i64,

    /// Dimension assignment for this sample
    #[serde(default)]
    pub dimensions: DimensionSpecification,

    /// Observed value
    pub value: SampleValue,
}

impl DataSample {
    /// Create a hit-count sample over `[start_ms, end_ms]`
    pub fn hit_count(start_ms: i64, end_ms: i64, hits: u64) -> Self {
        Self {
            start_ms,
            end_ms,
            dimensions: DimensionSpecification::new(),
            value: SampleValue::HitCount { hits },
        }
    }

    /// The merge identity of this sample
    pub fn key(&self) -> SampleKey {
        SampleKey {
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            dimensions: self.dimensions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_info_validate() {
        assert!(ServerInfo::new("a", 80).validate().is_ok());
        assert!(ServerInfo::new("", 80).validate().is_err());
    }

    #[test]
    fn test_server_info_equality_is_structural() {
        let a = ServerInfo::new("host", 9000);
        let b = ServerInfo::new("host", 9000);
        assert_eq!(a, b);
        assert_ne!(a, ServerInfo::new("host", 9001));
    }

    #[test]
    fn test_tiered_request_validate() {
        let request = TieredRequest::new(vec![ServerInfo::new("a", 1)]);
        assert!(request.validate().is_ok());

        let request = request.with_max_fanout(0);
        assert!(request.validate().is_err());

        let request = TieredRequest::new(vec![ServerInfo::new("a", 1)]).with_timeout_ms(0);
        assert!(request.validate().is_err());

        let request = TieredRequest::new(vec![ServerInfo::new("", 1)]);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_hit_count_merge_saturates() {
        let mut a = SampleValue::HitCount { hits: u64::MAX - 1 };
        let b = SampleValue::HitCount { hits: 10 };
        assert!(a.merge(&b));
        assert_eq!(a, SampleValue::HitCount { hits: u64::MAX });
    }

    #[test]
    fn test_histogram_merge_sums_per_bucket() {
        let mut a = SampleValue::Histogram {
            buckets: [(0, 1), (10, 2)].into_iter().collect(),
        };
        let b = SampleValue::Histogram {
            buckets: [(10, 3), (20, 4)].into_iter().collect(),
        };
        assert!(a.merge(&b));
        assert_eq!(
            a,
            SampleValue::Histogram {
                buckets: [(0, 1), (10, 5), (20, 4)].into_iter().collect(),
            }
        );
    }

    #[test]
    fn test_mismatched_kinds_do_not_merge() {
        let mut a = SampleValue::HitCount { hits: 1 };
        let b = SampleValue::Histogram {
            buckets: BTreeMap::new(),
        };
        assert!(!a.merge(&b));
        assert_eq!(a, SampleValue::HitCount { hits: 1 });
    }

    #[test]
    fn test_sample_key_distinguishes_dimensions() {
        let mut a = DataSample::hit_count(0, 1000, 5);
        let b = DataSample::hit_count(0, 1000, 5);
        assert_eq!(a.key(), b.key());

        a.dimensions.set("host", "web-01");
        assert_ne!(a.key(), b.key());
    }
}
