//! Client configuration
//!
//! Configuration is passed through constructor parameters; this module only
//! supplies the defaults and their validation. Deserialization support lets
//! an embedding service load the same knobs from its own config file.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Tunables for a [`DistributedQueryClient`](crate::query::DistributedQueryClient)
///
/// A query's [`TieredRequest`](crate::types::TieredRequest) may override
/// any of the routing fields; everything it leaves unset resolves to these
/// values on the client that issues it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Fan-out width for requests that do not override it
    #[serde(default = "default_max_fanout")]
    pub max_fanout: u32,

    /// Per-request budget in milliseconds for requests that do not
    /// override it
    #[serde(default = "default_fanout_timeout_ms")]
    pub fanout_timeout_ms: u32,

    /// Ask servers for per-source diagnostics unless a request overrides it
    #[serde(default = "default_diagnostics")]
    pub include_request_diagnostics: bool,

    /// User agent for the default transport
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_fanout() -> u32 {
    4
}

fn default_fanout_timeout_ms() -> u32 {
    5_000
}

fn default_diagnostics() -> bool {
    true
}

fn default_user_agent() -> String {
    concat!("fanout-metrics/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_fanout: default_max_fanout(),
            fanout_timeout_ms: default_fanout_timeout_ms(),
            include_request_diagnostics: default_diagnostics(),
            user_agent: default_user_agent(),
        }
    }
}

impl ClientConfig {
    /// Set the default fan-out width
    pub fn with_max_fanout(mut self, max_fanout: u32) -> Self {
        self.max_fanout = max_fanout;
        self
    }

    /// Set the default per-request budget
    pub fn with_timeout_ms(mut self, fanout_timeout_ms: u32) -> Self {
        self.fanout_timeout_ms = fanout_timeout_ms;
        self
    }

    /// Disable per-source diagnostics by default
    pub fn without_diagnostics(mut self) -> Self {
        self.include_request_diagnostics = false;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_fanout == 0 {
            return Err(Error::InvalidArgument(
                "max_fanout must be greater than zero".to_string(),
            ));
        }
        if self.fanout_timeout_ms == 0 {
            return Err(Error::InvalidArgument(
                "fanout_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
