//! Error types
//!
//! Construction-time problems are [`ConfigError`]s and are fatal to the source
//! being configured. Everything that happens after an ingester has started
//! ([`ProtocolError`], [`ConnectionError`]) is recoverable and only drives a
//! reconnect. [`Error::ClientWrite`] never leaves the subscriber it belongs to.

use std::fmt;
use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Invalid configuration
    Config(ConfigError),
    /// Malformed multipart framing
    Protocol(ProtocolError),
    /// Upstream unreachable, rejected or dropped
    Connection(ConnectionError),
    /// Writing to a downstream client failed
    ClientWrite(io::Error),
    /// Hub coordination failure
    Hub(HubError),
    /// Other I/O error (listener setup and similar)
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "config error: {}", e),
            Error::Protocol(e) => write!(f, "protocol error: {}", e),
            Error::Connection(e) => write!(f, "connection error: {}", e),
            Error::ClientWrite(e) => write!(f, "client write failed: {}", e),
            Error::Hub(e) => write!(f, "hub error: {}", e),
            Error::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Connection(e) => Some(e),
            Error::ClientWrite(e) | Error::Io(e) => Some(e),
            Error::Hub(e) => Some(e),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<ConnectionError> for Error {
    fn from(e: ConnectionError) -> Self {
        Error::Connection(e)
    }
}

impl From<HubError> for Error {
    fn from(e: HubError) -> Self {
        Error::Hub(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Configuration errors, reported before anything starts
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Source URL could not be parsed
    InvalidUrl(String),
    /// Source URL scheme is not http or https
    UnsupportedScheme(String),
    /// Frame rate cap is negative or not finite
    InvalidFrameRate(f64),
    /// Digest authentication requested without a username
    MissingCredentials,
    /// Serving path does not start with '/'
    InvalidPath(String),
    /// Two sources are bound to the same serving path
    DuplicatePath(String),
    /// Bind address could not be parsed
    InvalidBindAddr(String),
    /// No source configured
    NoSources,
    /// Sources file could not be read or parsed
    Load(String),
    /// HTTP client could not be built
    HttpClient(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidUrl(url) => write!(f, "invalid source url: {}", url),
            ConfigError::UnsupportedScheme(scheme) => {
                write!(f, "unsupported url scheme '{}', expected http or https", scheme)
            }
            ConfigError::InvalidFrameRate(rate) => write!(f, "invalid frame rate: {}", rate),
            ConfigError::MissingCredentials => {
                write!(f, "digest authentication requires a username")
            }
            ConfigError::InvalidPath(path) => {
                write!(
                    f,
                    "invalid proxy path '{}', must start with '/' and be a literal path",
                    path
                )
            }
            ConfigError::DuplicatePath(path) => write!(f, "duplicate proxy path: {}", path),
            ConfigError::InvalidBindAddr(addr) => write!(f, "invalid bind address: {}", addr),
            ConfigError::NoSources => write!(f, "no sources configured"),
            ConfigError::Load(msg) => write!(f, "failed to load sources: {}", msg),
            ConfigError::HttpClient(msg) => write!(f, "failed to build http client: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Multipart framing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Response content type is not multipart
    NotMultipart(String),
    /// Multipart content type carries no boundary parameter
    MissingBoundary(String),
    /// A part header line could not be parsed
    MalformedHeader(String),
    /// Content-Length header is not a number
    InvalidContentLength(String),
    /// A part carried no payload
    EmptyPart,
    /// A part exceeded the maximum frame size
    FrameTooLarge(usize),
    /// The stream ended in the middle of a part
    UnexpectedEof,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::NotMultipart(ct) => write!(f, "not a multipart stream: {}", ct),
            ProtocolError::MissingBoundary(ct) => write!(f, "no boundary in content type: {}", ct),
            ProtocolError::MalformedHeader(line) => write!(f, "malformed part header: {}", line),
            ProtocolError::InvalidContentLength(value) => {
                write!(f, "invalid content length: {}", value)
            }
            ProtocolError::EmptyPart => write!(f, "empty part payload"),
            ProtocolError::FrameTooLarge(size) => write!(f, "frame too large: {} bytes", size),
            ProtocolError::UnexpectedEof => write!(f, "stream ended mid-part"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Upstream connection errors
#[derive(Debug)]
pub enum ConnectionError {
    /// HTTP request failed before a response arrived
    Request(reqwest::Error),
    /// Upstream answered with a non-success status
    Status(u16),
    /// Authentication could not be completed
    Auth(String),
    /// Reading the response body failed
    Read(io::Error),
    /// Connecting took longer than the frame timeout
    Timeout,
    /// The source has no more upstreams to offer
    Closed,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Request(e) => write!(f, "request failed: {}", e),
            ConnectionError::Status(code) => write!(f, "unexpected status {}", code),
            ConnectionError::Auth(msg) => write!(f, "authentication failed: {}", msg),
            ConnectionError::Read(e) => write!(f, "read failed: {}", e),
            ConnectionError::Timeout => write!(f, "connect timed out"),
            ConnectionError::Closed => write!(f, "source closed"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Request(e) => Some(e),
            ConnectionError::Read(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ConnectionError {
    fn from(e: reqwest::Error) -> Self {
        ConnectionError::Request(e)
    }
}

/// Hub coordination errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The hub's coordination task has not been started
    NotStarted,
    /// The hub's coordination task has ended
    Closed,
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::NotStarted => write!(f, "hub is not started"),
            HubError::Closed => write!(f, "hub is shut down"),
        }
    }
}

impl std::error::Error for HubError {}
