//! Subscriber fan-out
//!
//! A hub owns one [`Ingester`](crate::ingest::Ingester) and republishes its
//! frames to any number of downstream viewers.
//!
//! # Architecture
//!
//! ```text
//!   Ingester task ──mpsc (frame_queue)──► Coordinator task
//!                                          │ registry: HashMap<id, Sender>
//!                                          │ idle timer (stop_delay)
//!                                          │
//!            ┌─────────────────────────────┼─────────────────────────┐
//!            │ try_send                    │ try_send                │ try_send
//!            ▼                             ▼                         ▼
//!      [Subscription]                [Subscription]            [Subscription]
//!      HTTP body stream              HTTP body stream          write_stream()
//!            │                             │                         │
//!            └──── Drop ──► Command::Leave ┴──► Coordinator ◄────────┘
//! ```
//!
//! Each subscriber has its own bounded buffer. When a buffer is full the new
//! frame is dropped for that subscriber only; the coordinator never waits on a
//! viewer, so a slow client cannot hold back the others or the upstream.
//!
//! `Bytes` payloads are reference counted, so a frame delivered to every
//! subscriber is never copied.

pub mod config;
pub mod handler;
pub mod pubsub;
pub mod state;
pub mod subscriber;

pub use config::HubConfig;
pub use handler::{client_address, write_stream};
pub use pubsub::Hub;
pub use state::HubState;
pub use subscriber::Subscription;
