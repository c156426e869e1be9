//! Multipart stream decoder
//!
//! Turns the body of an MJPEG response into a sequence of [`Frame`]s. The
//! decoder owns the parse cursor only; it never reconnects. The first error
//! ends the sequence for good and recovery is left to the ingester.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::error::{ConnectionError, ProtocolError, Result};
use crate::media::frame::{Frame, DEFAULT_CONTENT_TYPE};

/// Largest accepted part payload
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Longest accepted part header line
const MAX_HEADER_LINE: usize = 8 * 1024;

/// Read buffer size for the underlying body
const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// Looking for the next delimiter line
    SeekDelimiter,
    /// A delimiter was just consumed, part headers follow
    PartStart,
    /// Closing delimiter seen, end of stream, or a previous error
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Part,
    Close,
}

#[derive(Debug, Default)]
struct PartHeaders {
    content_type: Option<String>,
    content_length: Option<usize>,
}

/// Decoder for a multipart/x-mixed-replace body
pub struct MultipartDecoder<R> {
    reader: BufReader<R>,
    delimiter: Vec<u8>,
    /// Boundary token as advertised, matched verbatim when it already starts with "--"
    bare_delimiter: Option<Vec<u8>>,
    cursor: Cursor,
    next_sequence: u64,
}

impl<R: AsyncRead + Unpin> MultipartDecoder<R> {
    /// Create a decoder for `reader` using the boundary token from the response headers
    pub fn new(reader: R, boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());

        let bare_delimiter = boundary
            .starts_with("--")
            .then(|| boundary.as_bytes().to_vec());

        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, reader),
            delimiter,
            bare_delimiter,
            cursor: Cursor::SeekDelimiter,
            next_sequence: 0,
        }
    }

    /// Number the first decoded frame with `sequence`
    pub fn starting_at(mut self, sequence: u64) -> Self {
        self.next_sequence = sequence;
        self
    }

    /// Sequence number the next decoded frame will carry
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Whether the sequence has ended
    pub fn is_finished(&self) -> bool {
        self.cursor == Cursor::Finished
    }

    /// Decode the next frame
    ///
    /// Returns `Ok(None)` once the stream ended cleanly (closing delimiter or
    /// EOF between parts). After an error every later call returns `Ok(None)`.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.cursor == Cursor::Finished {
            return Ok(None);
        }

        match self.read_part().await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => {
                self.cursor = Cursor::Finished;
                Ok(None)
            }
            Err(e) => {
                self.cursor = Cursor::Finished;
                Err(e)
            }
        }
    }

    /// Consume the decoder as a stream that ends after the first error
    pub fn into_stream(self) -> impl Stream<Item = Result<Frame>> {
        futures::stream::unfold(self, |mut decoder| async move {
            match decoder.next_frame().await {
                Ok(Some(frame)) => Some((Ok(frame), decoder)),
                Ok(None) => None,
                Err(e) => Some((Err(e), decoder)),
            }
        })
    }

    async fn read_part(&mut self) -> Result<Option<Frame>> {
        if self.cursor == Cursor::SeekDelimiter {
            match self.seek_delimiter().await? {
                Some(Delimiter::Part) => {}
                Some(Delimiter::Close) | None => return Ok(None),
            }
        }
        self.cursor = Cursor::SeekDelimiter;

        let headers = self.read_headers().await?;
        let data = match headers.content_length {
            Some(len) => self.read_sized_payload(len).await?,
            None => self.scan_payload().await?,
        };

        if data.is_empty() {
            return Err(ProtocolError::EmptyPart.into());
        }

        let content_type = headers
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let frame = Frame::new(data, content_type, self.next_sequence);
        self.next_sequence += 1;

        Ok(Some(frame))
    }

    /// Skip preamble and inter-part padding up to the next delimiter line
    async fn seek_delimiter(&mut self) -> Result<Option<Delimiter>> {
        let mut skipped = 0usize;
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = self.read_line(&mut line, MAX_FRAME_SIZE).await?;
            if n == 0 {
                return Ok(None);
            }
            if let Some(kind) = self.delimiter_kind(&line) {
                return Ok(Some(kind));
            }

            skipped += n;
            if skipped > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge(skipped).into());
            }
        }
    }

    async fn read_headers(&mut self) -> Result<PartHeaders> {
        let mut headers = PartHeaders::default();
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = self.read_line(&mut line, MAX_HEADER_LINE).await?;
            if n == 0 {
                return Err(ProtocolError::UnexpectedEof.into());
            }
            if line.last() != Some(&b'\n') {
                if n >= MAX_HEADER_LINE {
                    let text = String::from_utf8_lossy(&line[..64.min(line.len())]).into_owned();
                    return Err(ProtocolError::MalformedHeader(text).into());
                }
                return Err(ProtocolError::UnexpectedEof.into());
            }

            let text = String::from_utf8_lossy(trim_line_ending(&line)).into_owned();
            if text.trim().is_empty() {
                return Ok(headers);
            }

            let Some((name, value)) = text.split_once(':') else {
                return Err(ProtocolError::MalformedHeader(text).into());
            };
            let name = name.trim();
            let value = value.trim();

            if name.eq_ignore_ascii_case("content-type") {
                headers.content_type = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("content-length") {
                let len = value
                    .parse::<usize>()
                    .map_err(|_| ProtocolError::InvalidContentLength(value.to_string()))?;
                headers.content_length = Some(len);
            }
        }
    }

    async fn read_sized_payload(&mut self, len: usize) -> Result<Bytes> {
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(len).into());
        }

        let mut buf = BytesMut::zeroed(len);
        match self.reader.read_exact(&mut buf).await {
            Ok(_) => Ok(buf.freeze()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ProtocolError::UnexpectedEof.into())
            }
            Err(e) => Err(ConnectionError::Read(e).into()),
        }
    }

    /// Read a payload without Content-Length: everything up to the next delimiter line
    async fn scan_payload(&mut self) -> Result<Bytes> {
        let mut payload = BytesMut::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            // payload never exceeds MAX_FRAME_SIZE here, so the limit is at least 1
            let limit = MAX_FRAME_SIZE + 1 - payload.len();
            let n = self.read_line(&mut line, limit).await?;
            if n == 0 {
                return Err(ProtocolError::UnexpectedEof.into());
            }

            if let Some(kind) = self.delimiter_kind(&line) {
                self.cursor = match kind {
                    Delimiter::Part => Cursor::PartStart,
                    Delimiter::Close => Cursor::Finished,
                };
                // The line break before a delimiter belongs to the delimiter
                let keep = trim_line_ending(&payload).len();
                payload.truncate(keep);
                return Ok(payload.freeze());
            }

            if line.last() != Some(&b'\n') && n < limit {
                return Err(ProtocolError::UnexpectedEof.into());
            }

            payload.extend_from_slice(&line);
            if payload.len() > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge(payload.len()).into());
            }
        }
    }

    /// Read up to and including the next '\n', at most `limit` bytes
    async fn read_line(&mut self, buf: &mut Vec<u8>, limit: usize) -> Result<usize> {
        (&mut self.reader)
            .take(limit as u64)
            .read_until(b'\n', buf)
            .await
            .map_err(|e| ConnectionError::Read(e).into())
    }

    fn delimiter_kind(&self, line: &[u8]) -> Option<Delimiter> {
        let line = trim_trailing_whitespace(line);

        let candidates = std::iter::once(self.delimiter.as_slice())
            .chain(self.bare_delimiter.as_deref());

        for delimiter in candidates {
            if line == delimiter {
                return Some(Delimiter::Part);
            }
            if line.len() == delimiter.len() + 2
                && line.starts_with(delimiter)
                && line.ends_with(b"--")
            {
                return Some(Delimiter::Close);
            }
        }

        None
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn trim_trailing_whitespace(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !matches!(b, b'\r' | b'\n' | b' ' | b'\t'))
        .map_or(0, |i| i + 1);
    &line[..end]
}
