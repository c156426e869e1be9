//! Boundary extraction from a `Content-Type` header value

use crate::error::ProtocolError;

/// Extract the multipart boundary token from a content type
///
/// Accepts quoted and bare parameter values; the parameter name and media type
/// are matched case-insensitively.
pub fn boundary_from_content_type(content_type: &str) -> Result<String, ProtocolError> {
    let mut parts = content_type.split(';');
    let media_type = parts.next().unwrap_or("").trim();

    if !media_type.to_ascii_lowercase().starts_with("multipart/") {
        return Err(ProtocolError::NotMultipart(content_type.to_string()));
    }

    for param in parts {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("boundary") {
            continue;
        }

        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);

        if !value.is_empty() {
            return Ok(value.to_string());
        }
    }

    Err(ProtocolError::MissingBoundary(content_type.to_string()))
}
