//! Client Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for a binder connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinderConfig {
    /// Bound on a root object request awaiting its reply
    pub request_timeout: Duration,
    /// Optimistic-write blackout window for mutable atoms
    pub blackout: Duration,
    /// Bound on transport establishment
    pub connect_timeout: Duration,
    /// Outbound queue depth before sends fail
    pub outbound_buffer: usize,
    /// Maximum encoded message size, both directions
    pub max_frame_size: usize,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            blackout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            outbound_buffer: 256,
            max_frame_size: wire::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl BinderConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_blackout(mut self, blackout: Duration) -> Self {
        self.blackout = blackout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_outbound_buffer(mut self, depth: usize) -> Self {
        self.outbound_buffer = depth;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}
