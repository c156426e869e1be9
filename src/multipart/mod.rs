//! multipart/x-mixed-replace framing
//!
//! MJPEG over HTTP is a never-ending MIME multipart body. Each part carries a
//! small header block and one JPEG:
//!
//! ```text
//! Content-Type: multipart/x-mixed-replace; boundary=frame
//!
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 4711\r\n
//! \r\n
//! <4711 bytes of JPEG>\r\n
//! --frame\r\n
//! ...
//! ```
//!
//! `Content-Length` is optional on the wire; without it the payload runs up to
//! the next delimiter line.

pub mod boundary;
pub mod decoder;
pub mod encoder;

pub use boundary::boundary_from_content_type;
pub use decoder::{MultipartDecoder, MAX_FRAME_SIZE};
pub use encoder::{content_type, encode_part, DEFAULT_BOUNDARY};
