//! Share-link decoding and encoding
//!
//! A share link looks like `ss://<base64 method:password>@<host>:<port>[/...]`.
//! Decoding is best-effort: characters outside the base64 alphabet and
//! invalid UTF-8 in the decoded credentials are dropped instead of failing
//! the whole link.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use crate::config::ConnectionConfig;
use crate::error::TunnelError;
use crate::Result;

/// Scheme prefix every share link starts with
pub const SCHEME_PREFIX: &str = "ss://";

/// URL-safe alphabet, tolerant of missing padding and stray trailing bits
const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode a share link into unvalidated connection fields.
///
/// Pure function: no I/O, no persistence. Validation happens on connect.
pub fn decode(link: &str) -> Result<ConnectionConfig> {
    let body = link
        .trim()
        .strip_prefix(SCHEME_PREFIX)
        .ok_or(TunnelError::NotAShareLink)?;

    let (credentials, endpoint) = body
        .split_once('@')
        .ok_or_else(|| TunnelError::malformed("missing '@' separator"))?;

    let decoded = decode_credentials(credentials)?;
    let (method, password) = decoded
        .split_once(':')
        .ok_or_else(|| TunnelError::malformed("credentials lack ':' separator"))?;

    let mut parts = endpoint.split(':');
    let server = parts.next().unwrap_or_default();
    let port_segment = parts
        .next()
        .ok_or_else(|| TunnelError::malformed("endpoint lacks ':' before port"))?;
    let port = port_segment.split('/').next().unwrap_or_default();

    Ok(ConnectionConfig::new(server, port, password, method))
}

/// Encode connection fields as a share link
pub fn encode(config: &ConnectionConfig) -> String {
    let credentials = format!("{}:{}", config.method, config.password);
    format!(
        "{}{}@{}:{}",
        SCHEME_PREFIX,
        URL_SAFE_NO_PAD.encode(credentials),
        config.server,
        config.port
    )
}

fn decode_credentials(segment: &str) -> Result<String> {
    // Accept both alphabets; anything else is noise.
    let mut cleaned: String = segment
        .chars()
        .filter_map(|c| match c {
            '+' => Some('-'),
            '/' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => Some(c),
            _ => None,
        })
        .collect();

    let padding = (4 - cleaned.len() % 4) % 4;
    cleaned.extend(std::iter::repeat('=').take(padding));

    let bytes = LENIENT_URL_SAFE
        .decode(cleaned.as_bytes())
        .map_err(|e| TunnelError::malformed(format!("credentials are not base64: {}", e)))?;

    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    Ok(text)
}
