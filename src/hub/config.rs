//! Hub configuration

use std::time::Duration;

use crate::multipart::DEFAULT_BOUNDARY;

/// Hub configuration options
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Keep the upstream connection this long after the last subscriber left
    pub stop_delay: Duration,

    /// Frames buffered per subscriber before newer frames are dropped for it
    pub subscriber_capacity: usize,

    /// Boundary token of the downstream multipart stream
    pub boundary: String,

    /// Request header carrying the client address (e.g. `X-Forwarded-For`)
    ///
    /// When unset or absent on a request, the peer socket address is used.
    pub client_header: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            stop_delay: Duration::from_secs(60),
            subscriber_capacity: 4,
            boundary: DEFAULT_BOUNDARY.to_string(),
            client_header: None,
        }
    }
}

impl HubConfig {
    /// Set the idle delay before the upstream is dropped
    pub fn stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    /// Set the per-subscriber buffer size (at least one frame)
    pub fn subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity.max(1);
        self
    }

    /// Set the downstream boundary token
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }

    /// Take client addresses from this request header
    pub fn client_header(mut self, header: impl Into<String>) -> Self {
        let header = header.into();
        self.client_header = (!header.is_empty()).then_some(header);
        self
    }
}
