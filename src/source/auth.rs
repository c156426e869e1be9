//! HTTP authentication for upstream requests
//!
//! Basic authentication is sent up front. Digest authentication (RFC 7616,
//! with the RFC 2617 legacy no-qop form) needs a round trip: the first request
//! is answered with `401` and a `WWW-Authenticate: Digest ...` challenge, from
//! which the `Authorization` header for the retry is computed.

use sha2::{Digest as _, Sha256};

use super::config::SourceConfig;

/// Authentication scheme for a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// No credentials
    None,
    /// HTTP Basic
    Basic { username: String, password: String },
    /// HTTP Digest
    Digest { username: String, password: String },
}

impl Auth {
    /// Derive the scheme from a source config
    pub fn from_config(config: &SourceConfig) -> Self {
        if !config.has_credentials() {
            return Auth::None;
        }

        let username = config.username.clone();
        let password = config.password.clone();
        if config.digest {
            Auth::Digest { username, password }
        } else {
            Auth::Basic { username, password }
        }
    }
}

/// Hash algorithm named in a digest challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    /// Parse the `algorithm` parameter (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "MD5" => Some(DigestAlgorithm::Md5),
            "MD5-SESS" => Some(DigestAlgorithm::Md5Sess),
            "SHA-256" => Some(DigestAlgorithm::Sha256),
            "SHA-256-SESS" => Some(DigestAlgorithm::Sha256Sess),
            _ => None,
        }
    }

    /// Token used in the `Authorization` header
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Md5Sess => "MD5-sess",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, DigestAlgorithm::Md5Sess | DigestAlgorithm::Sha256Sess)
    }

    fn hash(&self, data: &str) -> String {
        match self {
            DigestAlgorithm::Md5 | DigestAlgorithm::Md5Sess => {
                format!("{:x}", md5::compute(data.as_bytes()))
            }
            DigestAlgorithm::Sha256 | DigestAlgorithm::Sha256Sess => {
                hex::encode(Sha256::digest(data.as_bytes()))
            }
        }
    }
}

/// A parsed `WWW-Authenticate: Digest` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    /// `Some("auth")` when the server offers qop=auth, `None` for legacy digest
    pub qop: Option<String>,
    pub algorithm: DigestAlgorithm,
    pub opaque: Option<String>,
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` header value
    pub fn parse(header: &str) -> Result<Self, String> {
        let header = header.trim();
        let params = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("digest") => rest,
            _ => return Err(format!("not a digest challenge: {}", header)),
        };

        let mut realm = None;
        let mut nonce = None;
        let mut qop_options = None;
        let mut algorithm = DigestAlgorithm::Md5;
        let mut opaque = None;

        for (name, value) in parse_params(params) {
            match name.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => qop_options = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => {
                    algorithm = DigestAlgorithm::parse(&value)
                        .ok_or_else(|| format!("unsupported digest algorithm: {}", value))?;
                }
                _ => {}
            }
        }

        let qop = match qop_options {
            None => None,
            Some(options) => {
                if options.split(',').any(|o| o.trim().eq_ignore_ascii_case("auth")) {
                    Some("auth".to_string())
                } else {
                    return Err(format!("unsupported digest qop: {}", options));
                }
            }
        };

        Ok(Self {
            realm: realm.ok_or("digest challenge without realm")?,
            nonce: nonce.ok_or("digest challenge without nonce")?,
            qop,
            algorithm,
            opaque,
        })
    }

    /// Compute the `response` value
    pub fn response(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
        nc: u32,
    ) -> String {
        let alg = self.algorithm;

        let mut ha1 = alg.hash(&format!("{}:{}:{}", username, self.realm, password));
        if alg.is_session() {
            ha1 = alg.hash(&format!("{}:{}:{}", ha1, self.nonce, cnonce));
        }
        let ha2 = alg.hash(&format!("{}:{}", method, uri));

        match &self.qop {
            Some(qop) => alg.hash(&format!(
                "{}:{}:{:08x}:{}:{}:{}",
                ha1, self.nonce, nc, cnonce, qop, ha2
            )),
            None => alg.hash(&format!("{}:{}:{}", ha1, self.nonce, ha2)),
        }
    }

    /// Build the full `Authorization` header value
    pub fn authorization(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
        nc: u32,
    ) -> String {
        let response = self.response(username, password, method, uri, cnonce, nc);

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm={}, response=\"{}\"",
            username,
            self.realm,
            self.nonce,
            uri,
            self.algorithm.name(),
            response
        );
        if let Some(qop) = &self.qop {
            header.push_str(&format!(", qop={}, nc={:08x}, cnonce=\"{}\"", qop, nc, cnonce));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        header
    }
}

/// Fresh client nonce
pub fn new_cnonce() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Split `a="x, y", b=z` into name/value pairs, honoring quotes
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            name.push(c);
            chars.next();
        }
        let name = name.trim().to_string();
        if name.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => value.push(c),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                value = value.trim().to_string();
            }
        }

        params.push((name, value));
    }

    params
}
