//! Hub coordination task
//!
//! A [`Hub`] is a cheap handle; all registry state lives in one task that
//! serializes joins, leaves, frame broadcasts and the idle timer.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;

use super::config::HubConfig;
use super::state::HubState;
use super::subscriber::Subscription;
use crate::error::{HubError, Result};
use crate::ingest::Ingester;
use crate::media::frame::Frame;
use crate::source::{FrameSource, HttpSource};
use crate::stats::{HubStats, SubscriberStats};

/// How often to log per-subscriber drop warnings (every N drops)
const DROP_LOG_INTERVAL: u64 = 100;

/// Messages to the coordination task
pub(crate) enum Command {
    Join {
        id: u64,
        client: String,
        joined_at: Instant,
        frames: mpsc::Sender<Frame>,
    },
    Leave(u64),
    Stats(oneshot::Sender<HubStats>),
    Shutdown,
}

/// Fans one ingester's frames out to any number of subscribers
///
/// The ingester runs only while somebody watches: the first join starts it,
/// and it is stopped once the registry has stayed empty for the configured
/// stop delay.
pub struct Hub<S: FrameSource = HttpSource> {
    path: String,
    config: HubConfig,
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    state: watch::Receiver<HubState>,
    latest: watch::Receiver<Option<Frame>>,
    pending: Mutex<Option<Coordinator<S>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: FrameSource> Hub<S> {
    /// Create a hub serving `ingester` at `path`
    ///
    /// Nothing runs until [`start`](Self::start).
    pub fn new(path: impl Into<String>, ingester: Ingester<S>, config: HubConfig) -> Self {
        let path = path.into();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::channel(ingester.config().frame_queue.max(1));
        let (state_tx, state_rx) = watch::channel(HubState::NoSubscribers);
        let latest = ingester.watch_latest();

        let coordinator = Coordinator {
            path: path.clone(),
            stop_delay: config.stop_delay,
            ingester,
            commands: commands_rx,
            frames_tx,
            frames: frames_rx,
            subscribers: HashMap::new(),
            state: state_tx,
            idle: None,
            total_subscribers: 0,
            frames_received: 0,
            frames_dropped: 0,
        };

        Self {
            path,
            config,
            commands: commands_tx,
            next_id: AtomicU64::new(1),
            state: state_rx,
            latest,
            pending: Mutex::new(Some(coordinator)),
            task: Mutex::new(None),
        }
    }

    /// Serving path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Hub configuration
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Spawn the coordination task; later calls do nothing
    pub fn start(&self) {
        let coordinator = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(coordinator) = coordinator {
            tracing::info!(path = %self.path, "Hub started");
            let handle = tokio::spawn(coordinator.run());
            *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
    }

    /// Register a new subscriber
    ///
    /// The subscription receives every frame decoded after this call, minus
    /// frames dropped because its buffer was full. A subscription taken
    /// before [`start`](Self::start) waits for the hub to start.
    pub fn subscribe(&self, client: impl Into<String>) -> Result<Subscription> {
        let client = client.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (frames_tx, frames_rx) = mpsc::channel(self.config.subscriber_capacity.max(1));

        self.commands
            .send(Command::Join {
                id,
                client: client.clone(),
                joined_at: Instant::now(),
                frames: frames_tx,
            })
            .map_err(|_| HubError::Closed)?;

        Ok(Subscription::new(id, client, frames_rx, self.commands.clone()))
    }

    /// Statistics snapshot
    pub async fn stats(&self) -> Result<HubStats> {
        if self.is_pending() {
            return Err(HubError::NotStarted.into());
        }

        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats(tx))
            .map_err(|_| HubError::Closed)?;

        Ok(rx.await.map_err(|_| HubError::Closed)?)
    }

    /// Current state
    pub fn state(&self) -> HubState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<HubState> {
        self.state.clone()
    }

    /// Most recent frame forwarded by the ingester
    pub fn latest_frame(&self) -> Option<Frame> {
        self.latest.borrow().clone()
    }

    /// Whether the coordination task has ended
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Drop every subscriber, stop the ingester and end the coordination task
    pub async fn shutdown(&self) {
        // Never started: dropping the coordinator drops the ingester
        drop(
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let _ = self.commands.send(Command::Shutdown);

        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<S: FrameSource> Drop for Hub<S> {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct SubscriberEntry {
    frames: mpsc::Sender<Frame>,
    stats: SubscriberStats,
}

/// State owned by the coordination task
struct Coordinator<S: FrameSource> {
    path: String,
    stop_delay: Duration,
    ingester: Ingester<S>,
    commands: mpsc::UnboundedReceiver<Command>,
    frames_tx: mpsc::Sender<Frame>,
    frames: mpsc::Receiver<Frame>,
    subscribers: HashMap<u64, SubscriberEntry>,
    state: watch::Sender<HubState>,
    /// Running while draining
    idle: Option<Pin<Box<Sleep>>>,
    total_subscribers: u64,
    frames_received: u64,
    frames_dropped: u64,
}

impl<S: FrameSource> Coordinator<S> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                () = idle_elapsed(&mut self.idle), if self.idle.is_some() => self.on_idle(),
                Some(frame) = self.frames.recv() => self.broadcast(frame),
            }
        }

        self.close();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join {
                id,
                client,
                joined_at,
                frames,
            } => self.join(id, client, joined_at, frames),
            Command::Leave(id) => self.leave(id),
            Command::Stats(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn join(&mut self, id: u64, client: String, joined_at: Instant, frames: mpsc::Sender<Frame>) {
        let was_empty = self.subscribers.is_empty();

        let mut stats = SubscriberStats::new(id, client);
        stats.joined_at = joined_at;
        tracing::info!(
            path = %self.path,
            subscriber = id,
            client = %stats.client,
            subscribers = self.subscribers.len() + 1,
            "Subscriber joined"
        );
        self.subscribers.insert(id, SubscriberEntry { frames, stats });
        self.total_subscribers += 1;

        if was_empty {
            if self.idle.take().is_some() {
                tracing::debug!(path = %self.path, "Idle timer cancelled");
            }
            if !self.ingester.is_running() {
                self.ingester.start(self.frames_tx.clone());
            }
        }

        self.state.send_replace(HubState::Active);
    }

    fn leave(&mut self, id: u64) {
        let Some(entry) = self.subscribers.remove(&id) else {
            return;
        };

        tracing::info!(
            path = %self.path,
            subscriber = id,
            client = %entry.stats.client,
            frames_sent = entry.stats.frames_sent,
            frames_dropped = entry.stats.frames_dropped,
            drop_ratio = entry.stats.drop_ratio(),
            duration_secs = entry.stats.duration().as_secs(),
            "Subscriber left"
        );

        self.drain_if_empty();
    }

    fn broadcast(&mut self, frame: Frame) {
        self.frames_received += 1;

        let mut closed = Vec::new();
        for (id, entry) in self.subscribers.iter_mut() {
            // Decoded before this subscriber joined
            if frame.captured_at < entry.stats.joined_at {
                continue;
            }

            match entry.frames.try_send(frame.clone()) {
                Ok(()) => entry.stats.frames_sent += 1,
                Err(TrySendError::Full(_)) => {
                    entry.stats.frames_dropped += 1;
                    self.frames_dropped += 1;
                    if entry.stats.frames_dropped % DROP_LOG_INTERVAL == 0 {
                        tracing::warn!(
                            path = %self.path,
                            subscriber = *id,
                            dropped = entry.stats.frames_dropped,
                            "Subscriber is falling behind, dropping frames"
                        );
                    }
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        if closed.is_empty() {
            return;
        }
        for id in closed {
            if let Some(entry) = self.subscribers.remove(&id) {
                tracing::debug!(
                    path = %self.path,
                    subscriber = id,
                    frames_sent = entry.stats.frames_sent,
                    "Subscriber gone"
                );
            }
        }
        self.drain_if_empty();
    }

    fn drain_if_empty(&mut self) {
        if !self.subscribers.is_empty() || self.idle.is_some() {
            return;
        }

        tracing::info!(
            path = %self.path,
            stop_delay_secs = self.stop_delay.as_secs(),
            "Last subscriber left, draining"
        );
        self.idle = Some(Box::pin(tokio::time::sleep(self.stop_delay)));
        self.state.send_replace(HubState::Draining);
    }

    fn on_idle(&mut self) {
        self.idle = None;
        if !self.subscribers.is_empty() {
            return;
        }

        self.ingester.stop();
        self.discard_queued_frames();
        self.state.send_replace(HubState::NoSubscribers);
        tracing::info!(path = %self.path, "Idle, upstream disconnected");
    }

    fn close(&mut self) {
        // Dropping the senders ends every subscription stream
        self.subscribers.clear();
        self.idle = None;
        self.ingester.stop();
        self.discard_queued_frames();
        self.state.send_replace(HubState::NoSubscribers);
        tracing::info!(path = %self.path, "Hub shut down");
    }

    fn discard_queued_frames(&mut self) {
        while self.frames.try_recv().is_ok() {}
    }

    fn snapshot(&self) -> HubStats {
        let mut subscribers: Vec<SubscriberStats> = self
            .subscribers
            .values()
            .map(|entry| entry.stats.clone())
            .collect();
        subscribers.sort_by_key(|stats| stats.id);

        let mut stats = HubStats::new(self.path.clone(), self.ingester.stats());
        stats.state = *self.state.borrow();
        stats.subscribers = subscribers;
        stats.total_subscribers = self.total_subscribers;
        stats.frames_received = self.frames_received;
        stats.frames_dropped = self.frames_dropped;
        stats
    }
}

async fn idle_elapsed(idle: &mut Option<Pin<Box<Sleep>>>) {
    match idle {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::time::timeout;

    use super::*;
    use crate::error::Error;
    use crate::ingest::{IngestConfig, IngesterState};
    use crate::multipart::encode_part;
    use crate::source::{ChannelSource, UpstreamFeeder};

    const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

    fn hub(config: HubConfig) -> (Hub<ChannelSource>, UpstreamFeeder) {
        let (source, feeder) = ChannelSource::new("cam");
        let ingest = IngestConfig::default()
            .reconnect_delay(Duration::from_millis(10), Duration::from_millis(40));
        let ingester = Ingester::with_source(source, 0.0, ingest);
        (Hub::new("/cam", ingester, config), feeder)
    }

    async fn send(upstream: &mut DuplexStream, payload: &[u8]) {
        let part = encode_part("frame", &Frame::jpeg(Bytes::copy_from_slice(payload), 0));
        upstream.write_all(&part).await.unwrap();
    }

    async fn recv(subscription: &mut Subscription) -> Frame {
        timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("frame in time")
            .expect("subscription open")
    }

    async fn wait_state(hub: &Hub<ChannelSource>, state: HubState) {
        let mut rx = hub.watch_state();
        timeout(Duration::from_secs(30), rx.wait_for(|s| *s == state))
            .await
            .expect("state in time")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stats_before_start() {
        let (hub, _feeder) = hub(HubConfig::default());
        let err = hub.stats().await.unwrap_err();
        assert!(matches!(err, Error::Hub(HubError::NotStarted)));
    }

    #[tokio::test]
    async fn test_zero_capacities_are_clamped() {
        let (source, feeder) = ChannelSource::new("cam");
        let ingest = IngestConfig {
            frame_queue: 0,
            ..IngestConfig::default()
        };
        let config = HubConfig {
            subscriber_capacity: 0,
            ..HubConfig::default()
        };
        let hub = Hub::new("/cam", Ingester::with_source(source, 0.0, ingest), config);
        hub.start();

        let mut upstream = feeder.open(CONTENT_TYPE);
        let mut subscription = hub.subscribe("viewer").unwrap();
        send(&mut upstream, b"one").await;

        assert_eq!(&recv(&mut subscription).await.data[..], b"one");
    }

    #[tokio::test]
    async fn test_first_join_starts_ingester() {
        let (hub, feeder) = hub(HubConfig::default());
        hub.start();

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.state, HubState::NoSubscribers);
        assert_eq!(stats.ingest.state, IngesterState::Idle);

        let mut upstream = feeder.open(CONTENT_TYPE);
        let mut subscription = hub.subscribe("10.0.0.1:4000").unwrap();
        send(&mut upstream, b"one").await;
        send(&mut upstream, b"two").await;

        assert_eq!(&recv(&mut subscription).await.data[..], b"one");
        assert_eq!(&recv(&mut subscription).await.data[..], b"two");

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.state, HubState::Active);
        assert_eq!(stats.subscriber_count(), 1);
        assert_eq!(stats.subscribers[0].client, "10.0.0.1:4000");
        assert_eq!(stats.subscribers[0].frames_sent, 2);
        assert_eq!(stats.ingest.connects, 1);
        assert_eq!(hub.latest_frame().map(|f| f.data), Some(Bytes::from_static(b"two")));
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_others() {
        let (hub, feeder) = hub(HubConfig::default().subscriber_capacity(2));
        hub.start();

        let mut upstream = feeder.open(CONTENT_TYPE);
        let mut fast = hub.subscribe("fast").unwrap();
        let slow = hub.subscribe("slow").unwrap();

        for i in 0..10u8 {
            send(&mut upstream, &[b'a' + i]).await;
            let frame = recv(&mut fast).await;
            assert_eq!(frame.data[0], b'a' + i);
        }

        let stats = hub.stats().await.unwrap();
        let slow_stats = stats.subscribers.iter().find(|s| s.id == slow.id()).unwrap();
        assert_eq!(slow_stats.frames_sent, 2);
        assert_eq!(slow_stats.frames_dropped, 8);
        assert_eq!(slow_stats.drop_ratio(), 0.8);
        assert_eq!(stats.frames_dropped, 8);
        assert_eq!(stats.frames_received, 10);
    }

    #[tokio::test]
    async fn test_slow_subscriber_keeps_oldest_frames() {
        let (hub, feeder) = hub(HubConfig::default().subscriber_capacity(2));
        hub.start();

        let mut upstream = feeder.open(CONTENT_TYPE);
        let mut fast = hub.subscribe("fast").unwrap();
        let mut slow = hub.subscribe("slow").unwrap();

        for payload in [&b"1"[..], b"2", b"3", b"4"] {
            send(&mut upstream, payload).await;
            recv(&mut fast).await;
        }

        // Buffer filled with the first two; the rest was dropped
        assert_eq!(&recv(&mut slow).await.data[..], b"1");
        assert_eq!(&recv(&mut slow).await.data[..], b"2");

        send(&mut upstream, b"5").await;
        assert_eq!(&recv(&mut slow).await.data[..], b"5");
    }

    #[tokio::test]
    async fn test_late_joiner_gets_only_new_frames() {
        let (hub, feeder) = hub(HubConfig::default());
        hub.start();

        let mut upstream = feeder.open(CONTENT_TYPE);
        let mut early = hub.subscribe("early").unwrap();
        send(&mut upstream, b"before").await;
        assert_eq!(&recv(&mut early).await.data[..], b"before");

        let mut late = hub.subscribe("late").unwrap();
        send(&mut upstream, b"after").await;

        assert_eq!(&recv(&mut late).await.data[..], b"after");
        assert_eq!(&recv(&mut early).await.data[..], b"after");
        assert_eq!(hub.latest_frame().map(|f| f.data), Some(Bytes::from_static(b"after")));
    }

    #[tokio::test]
    async fn test_subscriber_survives_upstream_reconnect() {
        let (hub, feeder) = hub(HubConfig::default());
        hub.start();

        let mut first = feeder.open(CONTENT_TYPE);
        let mut subscription = hub.subscribe("viewer").unwrap();
        for payload in [&b"1"[..], b"2", b"3"] {
            send(&mut first, payload).await;
        }
        drop(first);

        let mut frames = Vec::new();
        for _ in 0..3 {
            frames.push(recv(&mut subscription).await);
        }

        let mut second = feeder.open(CONTENT_TYPE);
        send(&mut second, b"4").await;
        send(&mut second, b"5").await;
        for _ in 0..2 {
            frames.push(recv(&mut subscription).await);
        }

        let payloads: Vec<&[u8]> = frames.iter().map(|f| &f.data[..]).collect();
        assert_eq!(payloads, vec![&b"1"[..], b"2", b"3", b"4", b"5"]);
        assert!(frames.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert_eq!(hub.stats().await.unwrap().ingest.connects, 2);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let (hub, _feeder) = hub(HubConfig::default());
        hub.start();

        let first = hub.subscribe("a").unwrap();
        let _second = hub.subscribe("b").unwrap();
        let id = first.id();

        drop(first);
        hub.commands.send(Command::Leave(id)).unwrap();
        hub.commands.send(Command::Leave(9999)).unwrap();

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.subscriber_count(), 1);
        assert_eq!(stats.total_subscribers, 2);
        assert_eq!(stats.state, HubState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_hub_stops_ingester() {
        let (hub, feeder) = hub(HubConfig::default().stop_delay(Duration::from_secs(10)));
        hub.start();

        let mut upstream = feeder.open(CONTENT_TYPE);
        let mut subscription = hub.subscribe("viewer").unwrap();
        send(&mut upstream, b"x").await;
        recv(&mut subscription).await;

        drop(subscription);
        wait_state(&hub, HubState::Draining).await;

        // Upstream still connected while draining
        let stats = hub.stats().await.unwrap();
        assert!(stats.ingest.state.is_running());

        wait_state(&hub, HubState::NoSubscribers).await;
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.ingest.state, IngesterState::Idle);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(upstream.write_all(b"--frame\r\n").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_within_stop_delay_keeps_upstream() {
        let (hub, feeder) = hub(HubConfig::default().stop_delay(Duration::from_secs(10)));
        hub.start();

        let mut upstream = feeder.open(CONTENT_TYPE);
        let mut first = hub.subscribe("first").unwrap();
        send(&mut upstream, b"1").await;
        recv(&mut first).await;
        drop(first);
        wait_state(&hub, HubState::Draining).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        let mut second = hub.subscribe("second").unwrap();
        wait_state(&hub, HubState::Active).await;

        send(&mut upstream, b"2").await;
        assert_eq!(&recv(&mut second).await.data[..], b"2");

        // Well past the first stop delay
        tokio::time::sleep(Duration::from_secs(15)).await;
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.state, HubState::Active);
        assert_eq!(stats.ingest.connects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_after_idle_reconnects() {
        let (hub, feeder) = hub(HubConfig::default().stop_delay(Duration::from_secs(1)));
        hub.start();

        let mut first_upstream = feeder.open(CONTENT_TYPE);
        let mut first = hub.subscribe("first").unwrap();
        send(&mut first_upstream, b"1").await;
        recv(&mut first).await;
        drop(first);
        wait_state(&hub, HubState::NoSubscribers).await;

        let mut second_upstream = feeder.open(CONTENT_TYPE);
        let mut second = hub.subscribe("second").unwrap();
        send(&mut second_upstream, b"2").await;
        let frame = recv(&mut second).await;

        assert_eq!(&frame.data[..], b"2");
        assert!(frame.sequence > 0);
        assert_eq!(hub.stats().await.unwrap().ingest.connects, 2);
    }

    #[tokio::test]
    async fn test_shutdown_ends_subscriptions() {
        let (hub, _feeder) = hub(HubConfig::default());
        hub.start();

        let mut subscription = hub.subscribe("viewer").unwrap();
        hub.shutdown().await;

        assert!(subscription.recv().await.is_none());
        assert!(hub.is_closed());
        assert!(matches!(
            hub.subscribe("late").unwrap_err(),
            Error::Hub(HubError::Closed)
        ));
        assert!(matches!(
            hub.stats().await.unwrap_err(),
            Error::Hub(HubError::Closed)
        ));
        assert_eq!(hub.state(), HubState::NoSubscribers);
    }
}
