//! Ingester configuration

use std::time::Duration;

/// Tunables for the upstream fetch loop
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Reconnect when no frame is decoded within this time
    pub frame_timeout: Duration,

    /// Delay before the first reconnect attempt
    pub reconnect_delay: Duration,

    /// Upper bound for the reconnect delay
    pub max_reconnect_delay: Duration,

    /// TCP connect timeout for HTTP sources
    pub connect_timeout: Duration,

    /// Capacity of the ingester to hub frame channel
    pub frame_queue: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_secs(60),
            reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            frame_queue: 16,
        }
    }
}

impl IngestConfig {
    /// Set the stall timeout
    pub fn frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    /// Set the initial and maximum reconnect delay
    pub fn reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial;
        self.max_reconnect_delay = max.max(initial);
        self
    }

    /// Set the TCP connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the frame channel capacity
    pub fn frame_queue(mut self, capacity: usize) -> Self {
        self.frame_queue = capacity.max(1);
        self
    }
}
