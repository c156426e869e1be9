//! Statistics for ingesters, hubs and subscribers

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::hub::HubState;
use crate::ingest::IngesterState;

/// Live counters updated by an ingester task
#[derive(Debug, Default)]
pub struct IngestCounters {
    connects: AtomicU64,
    failures: AtomicU64,
    stalls: AtomicU64,
    frames_decoded: AtomicU64,
    frames_forwarded: AtomicU64,
    frames_throttled: AtomicU64,
    bytes_decoded: AtomicU64,
}

impl IngestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stall(&self) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decoded(&self, bytes: usize) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_decoded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded(&self) {
        self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_throttled(&self) {
        self.frames_throttled.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot for reporting
    pub fn snapshot(&self, state: IngesterState) -> IngestStats {
        IngestStats {
            state,
            connects: self.connects.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            frames_throttled: self.frames_throttled.load(Ordering::Relaxed),
            bytes_decoded: self.bytes_decoded.load(Ordering::Relaxed),
        }
    }
}

/// Ingester statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestStats {
    /// Current ingester state
    pub state: IngesterState,
    /// Successful upstream connections
    pub connects: u64,
    /// Failed connection attempts and broken streams
    pub failures: u64,
    /// Streams abandoned because no frame arrived in time
    pub stalls: u64,
    /// Frames decoded from the upstream
    pub frames_decoded: u64,
    /// Frames handed to the hub
    pub frames_forwarded: u64,
    /// Frames discarded by the frame rate cap
    pub frames_throttled: u64,
    /// Payload bytes decoded
    pub bytes_decoded: u64,
}

/// Per-subscriber statistics
#[derive(Debug, Clone)]
pub struct SubscriberStats {
    /// Subscriber ID
    pub id: u64,
    /// Client address (peer or forwarded header)
    pub client: String,
    /// When the subscriber joined
    pub joined_at: Instant,
    /// Frames queued for delivery
    pub frames_sent: u64,
    /// Frames dropped because the delivery buffer was full
    pub frames_dropped: u64,
}

impl SubscriberStats {
    pub fn new(id: u64, client: String) -> Self {
        Self {
            id,
            client,
            joined_at: Instant::now(),
            frames_sent: 0,
            frames_dropped: 0,
        }
    }

    /// Time since the subscriber joined
    pub fn duration(&self) -> Duration {
        self.joined_at.elapsed()
    }

    /// Share of frames dropped, between 0.0 and 1.0
    pub fn drop_ratio(&self) -> f64 {
        let total = self.frames_sent + self.frames_dropped;
        if total > 0 {
            self.frames_dropped as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Hub statistics
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Serving path
    pub path: String,
    /// Current hub state
    pub state: HubState,
    /// Currently registered subscribers
    pub subscribers: Vec<SubscriberStats>,
    /// Subscribers that ever joined
    pub total_subscribers: u64,
    /// Frames received from the ingester
    pub frames_received: u64,
    /// Per-subscriber drops summed over all subscribers
    pub frames_dropped: u64,
    /// Statistics of the hub's ingester
    pub ingest: IngestStats,
}

impl HubStats {
    pub fn new(path: String, ingest: IngestStats) -> Self {
        Self {
            path,
            state: HubState::NoSubscribers,
            subscribers: Vec::new(),
            total_subscribers: 0,
            frames_received: 0,
            frames_dropped: 0,
            ingest,
        }
    }

    /// Number of currently registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
