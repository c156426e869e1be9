//! In-process upstream source
//!
//! Lets an embedding application (or a test) hand upstream bodies to an
//! ingester directly: every [`UpstreamFeeder::push`] becomes the result of the
//! next `connect()`.

use tokio::io::{AsyncRead, DuplexStream};
use tokio::sync::{mpsc, Mutex};

use super::{FrameSource, Upstream};
use crate::error::ConnectionError;

/// Buffer size of duplex pipes created by [`UpstreamFeeder::open`]
const PIPE_CAPACITY: usize = 256 * 1024;

/// A source fed with upstream bodies through a channel
pub struct ChannelSource {
    name: String,
    upstreams: Mutex<mpsc::UnboundedReceiver<Upstream>>,
}

/// Sending half of a [`ChannelSource`]
#[derive(Clone)]
pub struct UpstreamFeeder {
    tx: mpsc::UnboundedSender<Upstream>,
}

impl ChannelSource {
    /// Create a source and the feeder that supplies it
    pub fn new(name: impl Into<String>) -> (Self, UpstreamFeeder) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            name: name.into(),
            upstreams: Mutex::new(rx),
        };
        (source, UpstreamFeeder { tx })
    }
}

impl FrameSource for ChannelSource {
    async fn connect(&self) -> Result<Upstream, ConnectionError> {
        self.upstreams
            .lock()
            .await
            .recv()
            .await
            .ok_or(ConnectionError::Closed)
    }

    fn describe(&self) -> String {
        format!("channel:{}", self.name)
    }
}

impl UpstreamFeeder {
    /// Queue an upstream body for the next connect
    ///
    /// Returns false when the source has been dropped.
    pub fn push(
        &self,
        content_type: impl Into<String>,
        body: impl AsyncRead + Send + Unpin + 'static,
    ) -> bool {
        self.tx.send(Upstream::new(content_type, body)).is_ok()
    }

    /// Queue an in-memory pipe and return its writing end
    ///
    /// Dropping the writer ends the upstream body.
    pub fn open(&self, content_type: impl Into<String>) -> DuplexStream {
        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        self.push(content_type, reader);
        writer
    }
}
