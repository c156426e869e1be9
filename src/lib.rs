//! MJPEG republishing proxy
//!
//! Ingests one `multipart/x-mixed-replace` JPEG stream per configured source
//! and republishes it to any number of HTTP clients. The upstream is only
//! connected while somebody watches.
//!
//! # Example
//!
//! ```no_run
//! use mjpeg_proxy::{BindAddr, ProxyServer, ServerConfig, SourceEntry};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::default()
//!     .bind(BindAddr::parse(":8080")?)
//!     .source(SourceEntry::new("http://camera.local/video.mjpg", "/"));
//!
//! let server = ProxyServer::new(config)?;
//! server.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await?;
//! # Ok(())
//! # }
//! ```
//!
//! The pieces can also be used on their own: a [`Hub`] over an [`Ingester`]
//! can be mounted into any axum application through [`Hub::router`].

pub mod error;
pub mod hub;
pub mod ingest;
pub mod media;
pub mod multipart;
pub mod server;
pub mod source;
pub mod stats;

pub use error::{Error, Result};
pub use hub::{Hub, HubConfig, HubState, Subscription};
pub use ingest::{IngestConfig, Ingester, IngesterState};
pub use media::Frame;
pub use server::{BindAddr, ProxyServer, ServerConfig, SourceEntry};
pub use source::{FrameSource, HttpSource, SourceConfig};
