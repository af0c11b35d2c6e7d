//! Tunables for the streaming engine.
//!
//! The defaults reproduce the protocol constants every peer assumes; tests
//! shrink the timeouts to keep runtimes reasonable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Granularity of block requests, in bytes.
pub const BUFFER_SIZE: u64 = 8192;

/// Upper bound on pending buffers plus in-flight block requests.
pub const MAX_BUFFERS: usize = 3;

/// How long a `read()` waits for a buffer before treating the stream as ended.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a stored peer latency, in milliseconds.
pub const MAX_LATENCY_MS: i32 = 1000;

/// Self-reported processing latencies beyond this are ignored as clock skew.
pub const LATENCY_SANITY_MS: i64 = 10_000;

/// How often a playing player refreshes its position snapshot.
pub const POSITION_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Runtime configuration for one streaming engine instance.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StreamingConfig {
    /// Block request size in bytes.
    pub buffer_size: u64,
    /// Pending-queue depth / pipelining window.
    pub max_buffers: usize,
    /// Stalled-peer liveness bound.
    #[serde(with = "duration_millis")]
    pub read_timeout: Duration,
    /// Bound on stored peer latency, milliseconds.
    pub max_latency_ms: i32,
    /// Position snapshot refresh interval while playing.
    #[serde(with = "duration_millis")]
    pub position_refresh_interval: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffer_size: BUFFER_SIZE,
            max_buffers: MAX_BUFFERS,
            read_timeout: READ_TIMEOUT,
            max_latency_ms: MAX_LATENCY_MS,
            position_refresh_interval: POSITION_REFRESH_INTERVAL,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
