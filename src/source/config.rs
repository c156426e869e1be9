//! Source configuration

use reqwest::Url;

use crate::error::ConfigError;

/// Where to fetch an MJPEG stream from and how to throttle it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceConfig {
    /// Upstream URL (http or https)
    pub url: String,

    /// Username, empty for no authentication
    pub username: String,

    /// Password
    pub password: String,

    /// Use Digest instead of Basic authentication
    pub digest: bool,

    /// Output frame rate cap in frames per second (0 = unlimited)
    pub rate: f64,
}

impl SourceConfig {
    /// Create a config for an unauthenticated, unthrottled source
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the credentials
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Use Digest authentication
    pub fn digest(mut self, digest: bool) -> Self {
        self.digest = digest;
        self
    }

    /// Cap the output frame rate
    pub fn rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Whether credentials are configured
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    /// Check the config and return the parsed URL
    pub fn validate(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.url).map_err(|_| ConfigError::InvalidUrl(self.url.clone()))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }

        if !self.rate.is_finite() || self.rate < 0.0 {
            return Err(ConfigError::InvalidFrameRate(self.rate));
        }

        if self.digest && !self.has_credentials() {
            return Err(ConfigError::MissingCredentials);
        }

        Ok(url)
    }
}
