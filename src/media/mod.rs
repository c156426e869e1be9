//! Media values passed from the ingester to subscribers

pub mod frame;

pub use frame::{Frame, DEFAULT_CONTENT_TYPE};
