//! Ingester state machine
//!
//! ```text
//! Idle ──start──► Connecting ──connected──► Streaming
//!                     ▲                        │
//!                     │                 timeout│ error / end
//!                     │                        ▼
//!                     └────backoff──── Stalled / Closed
//! ```
//!
//! `stop()` returns to `Idle` from any state.

use std::fmt;

/// Lifecycle state of an ingester
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngesterState {
    /// Not started, or stopped by the hub
    Idle,
    /// Opening the upstream connection
    Connecting,
    /// Decoding frames
    Streaming,
    /// No frame arrived within the frame timeout
    Stalled,
    /// Upstream ended or failed, waiting to reconnect
    Closed,
}

impl IngesterState {
    /// Whether the fetch loop is active
    pub fn is_running(&self) -> bool {
        !matches!(self, IngesterState::Idle)
    }
}

impl fmt::Display for IngesterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngesterState::Idle => "idle",
            IngesterState::Connecting => "connecting",
            IngesterState::Streaming => "streaming",
            IngesterState::Stalled => "stalled",
            IngesterState::Closed => "closed",
        };
        f.write_str(name)
    }
}
