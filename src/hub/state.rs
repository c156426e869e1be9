//! Hub lifecycle state

use std::fmt;

/// Lifecycle state of a hub
///
/// ```text
/// NoSubscribers ──join──► Active ──last leave──► Draining
///       ▲                   ▲                       │
///       │                   └─────────join──────────┤
///       └────────────stop delay elapsed─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    /// Nobody is watching and the upstream is not connected
    NoSubscribers,
    /// At least one subscriber is registered
    Active,
    /// Last subscriber left; upstream kept until the stop delay elapses
    Draining,
}

impl fmt::Display for HubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HubState::NoSubscribers => "no-subscribers",
            HubState::Active => "active",
            HubState::Draining => "draining",
        };
        f.write_str(name)
    }
}
