//! HTTP server
//!
//! Wires configured sources to hubs and serves them:
//!
//! ```text
//!   ServerConfig ──validate──► ProxyServer
//!                                │ per source: Ingester ──► Hub (path)
//!                                ▼
//!                     axum Router (merged hub routes)
//!                                │
//!                     TCP or unix socket listener
//! ```

pub mod config;
pub mod listener;

pub use config::{load_sources, BindAddr, ServerConfig, SourceEntry, DEFAULT_PATH};
pub use listener::ProxyServer;
