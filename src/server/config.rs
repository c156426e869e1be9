//! Server configuration

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::hub::HubConfig;
use crate::ingest::IngestConfig;
use crate::source::SourceConfig;

/// Serving path used when none is configured
pub const DEFAULT_PATH: &str = "/";

/// Where the HTTP server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAddr {
    /// TCP socket address
    Tcp(SocketAddr),
    /// Unix domain socket path
    Unix(PathBuf),
}

impl BindAddr {
    /// Parse `unix:/path`, `:port` or `host:port`
    pub fn parse(addr: &str) -> Result<Self, ConfigError> {
        if let Some(path) = addr.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ConfigError::InvalidBindAddr(addr.to_string()));
            }
            return Ok(BindAddr::Unix(PathBuf::from(path)));
        }

        // ":8080" listens on every interface
        let full = match addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port),
            None => addr.to_string(),
        };

        full.parse()
            .map(BindAddr::Tcp)
            .map_err(|_| ConfigError::InvalidBindAddr(addr.to_string()))
    }
}

impl Default for BindAddr {
    fn default() -> Self {
        BindAddr::Tcp(SocketAddr::from(([0, 0, 0, 0], 8080)))
    }
}

impl FromStr for BindAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BindAddr::parse(s)
    }
}

impl fmt::Display for BindAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindAddr::Tcp(addr) => write!(f, "{}", addr),
            BindAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// One proxied source as written in a sources file
///
/// ```json
/// [{"Source": "http://cam1/video.mjpg", "Path": "/cam1", "Rate": 5}]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceEntry {
    pub source: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub digest: bool,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub rate: f64,
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

impl SourceEntry {
    /// Proxy `source` at `path` without authentication or rate cap
    pub fn new(source: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            username: String::new(),
            password: String::new(),
            digest: false,
            path: path.into(),
            rate: 0.0,
        }
    }

    /// Upstream settings for this entry
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig::new(self.source.clone())
            .credentials(self.username.clone(), self.password.clone())
            .digest(self.digest)
            .rate(self.rate)
    }
}

/// Server configuration options
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: BindAddr,

    /// Proxied sources, one hub each
    pub sources: Vec<SourceEntry>,

    /// Ingester settings shared by every source
    pub ingest: IngestConfig,

    /// Hub settings shared by every source
    pub hub: HubConfig,
}

impl ServerConfig {
    /// Set the bind address
    pub fn bind(mut self, bind: BindAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Add a source
    pub fn source(mut self, entry: SourceEntry) -> Self {
        self.sources.push(entry);
        self
    }

    /// Replace the sources
    pub fn sources(mut self, sources: Vec<SourceEntry>) -> Self {
        self.sources = sources;
        self
    }

    /// Set ingester settings
    pub fn ingest(mut self, ingest: IngestConfig) -> Self {
        self.ingest = ingest;
        self
    }

    /// Set hub settings
    pub fn hub(mut self, hub: HubConfig) -> Self {
        self.hub = hub;
        self
    }

    /// Check the configuration before anything binds or connects
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }

        let mut paths = HashSet::new();
        for entry in &self.sources {
            if !is_literal_path(&entry.path) {
                return Err(ConfigError::InvalidPath(entry.path.clone()));
            }
            if !paths.insert(entry.path.as_str()) {
                return Err(ConfigError::DuplicatePath(entry.path.clone()));
            }
            entry.source_config().validate()?;
        }

        Ok(())
    }
}

/// Absolute path the router matches verbatim
///
/// Braces and segments starting with `:` or `*` are route syntax to axum.
fn is_literal_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.contains(['{', '}'])
        && !path.split('/').any(|segment| segment.starts_with([':', '*']))
}

/// Read a JSON array of sources; an empty file holds no sources
pub fn load_sources(path: impl AsRef<Path>) -> Result<Vec<SourceEntry>, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(&text).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}
