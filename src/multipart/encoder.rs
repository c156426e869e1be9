//! Downstream part encoding

use bytes::{BufMut, Bytes, BytesMut};

use crate::media::frame::Frame;

/// Boundary token used for downstream responses
pub const DEFAULT_BOUNDARY: &str = "mjpegproxyboundary";

/// `Content-Type` header value for a downstream response
pub fn content_type(boundary: &str) -> String {
    format!("multipart/x-mixed-replace; boundary={}", boundary)
}

/// Encode one frame as a complete multipart part
///
/// The payload is copied once into the part buffer; headers and trailing CRLF
/// are written around it so a single write per frame reaches the socket.
pub fn encode_part(boundary: &str, frame: &Frame) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        boundary,
        frame.content_type,
        frame.data.len()
    );

    let mut buf = BytesMut::with_capacity(header.len() + frame.data.len() + 2);
    buf.put_slice(header.as_bytes());
    buf.put_slice(&frame.data);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipart::MultipartDecoder;

    #[test]
    fn test_content_type() {
        assert_eq!(
            content_type("abc"),
            "multipart/x-mixed-replace; boundary=abc"
        );
    }

    #[test]
    fn test_part_layout() {
        let frame = Frame::jpeg(Bytes::from_static(b"JPEG"), 0);
        let part = encode_part("b", &frame);

        assert_eq!(
            &part[..],
            b"--b\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPEG\r\n"
        );
    }

    #[tokio::test]
    async fn test_encoded_parts_decode() {
        let frames = [
            Frame::jpeg(Bytes::from_static(b"\xFF\xD8\r\n--b\r\n\xFF\xD9"), 0),
            Frame::new(Bytes::from_static(b"second"), "image/png", 1),
        ];

        let mut body = Vec::new();
        for frame in &frames {
            body.extend_from_slice(&encode_part("b", frame));
        }

        let mut decoder = MultipartDecoder::new(body.as_slice(), "b");

        // Content-Length keeps an embedded delimiter inside the payload intact
        let first = decoder.next_frame().await.unwrap().unwrap();
        assert_eq!(first.data, frames[0].data);

        let second = decoder.next_frame().await.unwrap().unwrap();
        assert_eq!(&*second.content_type, "image/png");
        assert!(decoder.next_frame().await.unwrap().is_none());
    }
}
