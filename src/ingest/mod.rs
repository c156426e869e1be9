//! Upstream ingestion
//!
//! An [`Ingester`] keeps one upstream MJPEG connection alive for as long as
//! it is running:
//!
//! - connects through a [`FrameSource`](crate::source::FrameSource)
//! - decodes multipart parts into [`Frame`](crate::media::Frame)s with
//!   monotonic sequence numbers that survive reconnects
//! - applies the optional output rate cap
//! - reconnects with bounded exponential backoff when the upstream stalls,
//!   fails or ends

pub mod config;
pub mod ingester;
pub mod rate;
pub mod state;

pub use config::IngestConfig;
pub use ingester::Ingester;
pub use rate::{Backoff, RateLimiter};
pub use state::IngesterState;
