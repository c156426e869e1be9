//! Subscriber handle

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::pubsub::Command;
use crate::media::frame::Frame;

/// One downstream viewer's frame feed
///
/// Yields frames broadcast after the join, in decode order, until the hub
/// removes the subscriber or shuts down. Dropping the subscription leaves the
/// hub.
pub struct Subscription {
    id: u64,
    client: String,
    frames: mpsc::Receiver<Frame>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        client: String,
        frames: mpsc::Receiver<Frame>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            client,
            frames,
            commands,
        }
    }

    /// Subscriber ID, unique within the hub
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Client address used in logs
    pub fn client(&self) -> &str {
        &self.client
    }

    /// Wait for the next frame; `None` once the hub dropped this subscriber
    pub async fn recv(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }
}

impl Stream for Subscription {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.frames.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Hub may already be gone
        let _ = self.commands.send(Command::Leave(self.id));
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("client", &self.client)
            .finish()
    }
}
