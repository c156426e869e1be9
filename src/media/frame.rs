//! Frame type shared between the ingester and every subscriber

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

/// Content type assumed for parts that do not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// One decoded image from the upstream multipart stream
///
/// Cheap to clone: the payload is reference counted via `Bytes` and the
/// content type via `Arc<str>`, so fan-out never copies image data.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded image payload (normally a JPEG)
    pub data: Bytes,
    /// Content type declared by the part
    pub content_type: Arc<str>,
    /// Sequence number, strictly increasing for the lifetime of an ingester
    pub sequence: u64,
    /// When the frame finished decoding
    pub captured_at: Instant,
}

impl Frame {
    /// Create a frame captured now
    pub fn new(data: Bytes, content_type: impl Into<Arc<str>>, sequence: u64) -> Self {
        Self {
            data,
            content_type: content_type.into(),
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Create a JPEG frame captured now
    pub fn jpeg(data: Bytes, sequence: u64) -> Self {
        Self::new(data, DEFAULT_CONTENT_TYPE, sequence)
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
