//! Upstream fetch loop
//!
//! One ingester owns one upstream connection at a time. Its task connects,
//! decodes, throttles and forwards frames to the hub, and reconnects forever
//! when the upstream stalls, fails or ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::config::IngestConfig;
use super::rate::{Backoff, RateLimiter};
use super::state::IngesterState;
use crate::error::{ConfigError, ConnectionError};
use crate::media::frame::Frame;
use crate::multipart::{boundary_from_content_type, MultipartDecoder};
use crate::source::{FrameSource, HttpSource, SourceConfig, Upstream};
use crate::stats::{IngestCounters, IngestStats};

/// Ingests one upstream MJPEG stream
pub struct Ingester<S: FrameSource = HttpSource> {
    shared: Arc<Shared<S>>,
    task: Option<JoinHandle<()>>,
}

/// State shared between the ingester handle and its task
struct Shared<S> {
    source: S,
    description: String,
    config: IngestConfig,
    rate: f64,
    latest: watch::Sender<Option<Frame>>,
    state: watch::Sender<IngesterState>,
    counters: IngestCounters,
    /// Next sequence number; survives reconnects
    next_sequence: AtomicU64,
    /// Bumped on every start and stop; a task only publishes state for its own run
    generation: AtomicU64,
}

/// Why a single upstream session ended
enum SessionEnd {
    /// The upstream failed, stalled or ended; `produced` if any frame was decoded
    Retry { produced: bool },
    /// Nobody consumes frames anymore
    SinkClosed,
}

impl Ingester<HttpSource> {
    /// Create an ingester for an HTTP(S) MJPEG source
    ///
    /// Fails only on invalid configuration; nothing is contacted until
    /// [`start`](Self::start).
    pub fn new(source: SourceConfig, config: IngestConfig) -> Result<Self, ConfigError> {
        let http = HttpSource::new(&source, config.connect_timeout)?;
        Ok(Self::with_source(http, source.rate, config))
    }
}

impl<S: FrameSource> Ingester<S> {
    /// Create an ingester over any frame source
    ///
    /// `rate` caps the output frame rate; zero means unlimited.
    pub fn with_source(source: S, rate: f64, config: IngestConfig) -> Self {
        let (latest, _) = watch::channel(None);
        let (state, _) = watch::channel(IngesterState::Idle);

        Self {
            shared: Arc::new(Shared {
                description: source.describe(),
                source,
                config,
                rate,
                latest,
                state,
                counters: IngestCounters::new(),
                next_sequence: AtomicU64::new(0),
                generation: AtomicU64::new(0),
            }),
            task: None,
        }
    }

    /// Ingest configuration
    pub fn config(&self) -> &IngestConfig {
        &self.shared.config
    }

    /// Source description used in logs
    pub fn describe(&self) -> &str {
        &self.shared.description
    }

    /// Start the fetch loop, forwarding frames to `sink`
    ///
    /// Does nothing if the loop is already running.
    pub fn start(&mut self, sink: mpsc::Sender<Frame>) {
        if self.is_running() {
            return;
        }

        tracing::info!(source = %self.shared.description, "Starting ingester");

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = Arc::clone(&self.shared);
        self.task = Some(tokio::spawn(run(shared, generation, sink)));
    }

    /// Stop the fetch loop and drop the upstream connection
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // An aborted task still being polled can no longer publish state
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            self.shared.state.send_replace(IngesterState::Idle);
            tracing::info!(source = %self.shared.description, "Ingester stopped");
        }
    }

    /// Whether the fetch loop is running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Most recently forwarded frame, if any
    pub fn latest_frame(&self) -> Option<Frame> {
        self.shared.latest.borrow().clone()
    }

    /// Watch the most recently forwarded frame
    pub fn watch_latest(&self) -> watch::Receiver<Option<Frame>> {
        self.shared.latest.subscribe()
    }

    /// Current state
    pub fn state(&self) -> IngesterState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<IngesterState> {
        self.shared.state.subscribe()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> IngestStats {
        self.shared.counters.snapshot(self.state())
    }
}

impl<S: FrameSource> Drop for Ingester<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run<S: FrameSource>(shared: Arc<Shared<S>>, generation: u64, sink: mpsc::Sender<Frame>) {
    let mut backoff = Backoff::new(
        shared.config.reconnect_delay,
        shared.config.max_reconnect_delay,
    );
    let mut limiter = RateLimiter::new(shared.rate);

    loop {
        shared.set_state(generation, IngesterState::Connecting);

        match shared.session(generation, &sink, &mut limiter).await {
            SessionEnd::SinkClosed => {
                tracing::debug!(source = %shared.description, "Frame sink closed");
                shared.set_state(generation, IngesterState::Idle);
                return;
            }
            SessionEnd::Retry { produced } => {
                if produced {
                    backoff.reset();
                }
            }
        }

        let delay = backoff.next_delay();
        tracing::info!(
            source = %shared.description,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to upstream"
        );
        tokio::time::sleep(delay).await;
    }
}

impl<S: FrameSource> Shared<S> {
    /// Publish `state` unless the run `generation` was stopped
    fn set_state(&self, generation: u64, state: IngesterState) {
        self.state.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            *current = state;
            true
        });
    }

    async fn open(&self) -> Result<Upstream, ConnectionError> {
        match timeout(self.config.frame_timeout, self.source.connect()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    async fn session(
        &self,
        generation: u64,
        sink: &mpsc::Sender<Frame>,
        limiter: &mut RateLimiter,
    ) -> SessionEnd {
        let upstream = match self.open().await {
            Ok(upstream) => upstream,
            Err(e) => {
                self.counters.record_failure();
                self.set_state(generation, IngesterState::Closed);
                tracing::warn!(source = %self.description, error = %e, "Upstream connect failed");
                return SessionEnd::Retry { produced: false };
            }
        };

        let boundary = match boundary_from_content_type(&upstream.content_type) {
            Ok(boundary) => boundary,
            Err(e) => {
                self.counters.record_failure();
                self.set_state(generation, IngesterState::Closed);
                tracing::warn!(source = %self.description, error = %e, "Upstream is not an MJPEG stream");
                return SessionEnd::Retry { produced: false };
            }
        };

        self.counters.record_connect();
        self.set_state(generation, IngesterState::Streaming);
        tracing::info!(source = %self.description, boundary = %boundary, "Connected to upstream");

        let start = self.next_sequence.load(Ordering::Relaxed);
        let mut decoder = MultipartDecoder::new(upstream.body, &boundary).starting_at(start);
        let mut produced = false;

        loop {
            let frame = match timeout(self.config.frame_timeout, decoder.next_frame()).await {
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => {
                    self.set_state(generation, IngesterState::Closed);
                    tracing::info!(source = %self.description, "Upstream ended the stream");
                    break;
                }
                Ok(Err(e)) => {
                    self.counters.record_failure();
                    self.set_state(generation, IngesterState::Closed);
                    tracing::warn!(source = %self.description, error = %e, "Upstream stream failed");
                    break;
                }
                Err(_) => {
                    self.counters.record_stall();
                    self.set_state(generation, IngesterState::Stalled);
                    tracing::warn!(
                        source = %self.description,
                        timeout_secs = self.config.frame_timeout.as_secs_f64(),
                        "No frame within timeout"
                    );
                    break;
                }
            };

            produced = true;
            self.next_sequence
                .store(decoder.next_sequence(), Ordering::Relaxed);
            self.counters.record_decoded(frame.len());

            if !limiter.admit(frame.captured_at) {
                self.counters.record_throttled();
                continue;
            }

            self.counters.record_forwarded();
            self.latest.send_replace(Some(frame.clone()));

            if sink.send(frame).await.is_err() {
                return SessionEnd::SinkClosed;
            }
        }

        SessionEnd::Retry { produced }
    }
}
