//! Upstream transports
//!
//! A [`FrameSource`] knows how to open one connection to the upstream and hand
//! back its multipart body as a byte stream. It never parses frames and never
//! retries; the ingester drives it in a loop.

pub mod auth;
pub mod channel;
pub mod config;
pub mod http;

use std::future::Future;

use tokio::io::AsyncRead;

use crate::error::ConnectionError;

pub use auth::{Auth, DigestAlgorithm, DigestChallenge};
pub use channel::{ChannelSource, UpstreamFeeder};
pub use config::SourceConfig;
pub use http::HttpSource;

/// An open upstream response
pub struct Upstream {
    /// Response `Content-Type`, carrying the multipart boundary
    pub content_type: String,
    /// Response body
    pub body: Box<dyn AsyncRead + Send + Unpin>,
}

impl Upstream {
    pub fn new(content_type: impl Into<String>, body: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            content_type: content_type.into(),
            body: Box::new(body),
        }
    }
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Transport to an upstream MJPEG stream
pub trait FrameSource: Send + Sync + 'static {
    /// Open a new connection to the upstream
    fn connect(&self) -> impl Future<Output = Result<Upstream, ConnectionError>> + Send;

    /// Human readable description for logs
    fn describe(&self) -> String;
}
