//! Client configuration.
//!
//! [`ClientConfig`] holds every tunable of a client. Missing fields take
//! their defaults, so a partial JSON document is a valid configuration:
//!
//! ```
//! use sockwire::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{ "endpoint": "127.0.0.1:9000", "retry_limit": 3 }"#).unwrap();
//! assert_eq!(config.retry_limit, 3);
//! assert_eq!(config.receive_buffer_size, sockwire::DEFAULT_RECEIVE_BUFFER_SIZE);
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reader::DEFAULT_RECEIVE_BUFFER_SIZE;
use crate::retry::{DEFAULT_RETRY_INTERVAL, DEFAULT_RETRY_LIMIT};

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Tunables of a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Remote endpoint. Can also be set later with `connect_addr`.
    pub endpoint: Option<SocketAddr>,
    /// Retries per connect cycle; 0 retries forever.
    pub retry_limit: u32,
    /// Delay between retry ticks, in milliseconds.
    pub retry_interval_ms: u64,
    /// Size of the fixed receive buffer.
    pub receive_buffer_size: usize,
    /// Events buffered per subscriber before it starts lagging.
    pub event_capacity: usize,
    /// Set `TCP_NODELAY` on the socket (TCP transport only).
    pub nodelay: bool,
    /// Start a new connect cycle after a transport fault.
    pub reconnect_on_disconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            nodelay: true,
            reconnect_on_disconnect: false,
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the configuration to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Retry interval as a [`Duration`].
    #[inline]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}
