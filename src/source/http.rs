//! HTTP(S) upstream source

use std::io;
use std::time::Duration;

use futures::TryStreamExt;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode, Url};
use tokio_util::io::StreamReader;

use super::auth::{new_cnonce, Auth, DigestChallenge};
use super::config::SourceConfig;
use super::{FrameSource, Upstream};
use crate::error::{ConfigError, ConnectionError};

/// Fetches an MJPEG stream with a plain HTTP GET
pub struct HttpSource {
    client: Client,
    url: Url,
    auth: Auth,
}

impl HttpSource {
    /// Create a source from a validated config
    pub fn new(config: &SourceConfig, connect_timeout: Duration) -> Result<Self, ConfigError> {
        let url = config.validate()?;
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            url,
            auth: Auth::from_config(config),
        })
    }

    /// Upstream URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn send(&self) -> Result<Response, ConnectionError> {
        match &self.auth {
            Auth::None => Ok(self.client.get(self.url.clone()).send().await?),
            Auth::Basic { username, password } => Ok(self
                .client
                .get(self.url.clone())
                .basic_auth(username, Some(password))
                .send()
                .await?),
            Auth::Digest { username, password } => {
                let response = self.client.get(self.url.clone()).send().await?;
                if response.status() != StatusCode::UNAUTHORIZED {
                    return Ok(response);
                }

                let challenge = find_digest_challenge(response.headers())?;
                let authorization = challenge.authorization(
                    username,
                    password,
                    "GET",
                    &request_uri(&self.url),
                    &new_cnonce(),
                    1,
                );

                tracing::debug!(url = %self.url, realm = %challenge.realm, "Answering digest challenge");

                Ok(self
                    .client
                    .get(self.url.clone())
                    .header(AUTHORIZATION, authorization)
                    .send()
                    .await?)
            }
        }
    }
}

impl FrameSource for HttpSource {
    async fn connect(&self) -> Result<Upstream, ConnectionError> {
        let response = self.send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ConnectionError::Auth(format!(
                "upstream rejected credentials ({})",
                status
            )));
        }
        if !status.is_success() {
            return Err(ConnectionError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = response.bytes_stream().map_err(io::Error::other);
        let reader = StreamReader::new(Box::pin(body));

        Ok(Upstream::new(content_type, reader))
    }

    fn describe(&self) -> String {
        let mut url = self.url.clone();
        let _ = url.set_password(None);
        url.to_string()
    }
}

fn find_digest_challenge(headers: &HeaderMap) -> Result<DigestChallenge, ConnectionError> {
    let mut last_error = None;

    for value in headers.get_all(WWW_AUTHENTICATE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        match DigestChallenge::parse(value) {
            Ok(challenge) => return Ok(challenge),
            Err(e) => last_error = Some(e),
        }
    }

    Err(ConnectionError::Auth(
        last_error.unwrap_or_else(|| "no digest challenge offered".to_string()),
    ))
}

/// Path and query as sent in the request line
fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
