//! Content-addressed cache keys for capture requests.
//!
//! A request is keyed by its normalized target URL, its output format and, for
//! animated output only, its sequence length.

use crate::{CaptureError, CaptureFormat};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

const DEFAULT_SCHEME_PREFIX: &str = "http://";
const KEY_SEPARATOR: &str = "|";

/// An absolute `http`/`https` URL in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedUrl(Url);

impl NormalizedUrl {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Opaque fixed-width hex fingerprint of a capture request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps a key read back from a persisted index.
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prepends `http://` when the input has no `scheme://` prefix, then parses
/// and canonicalizes the result.
///
/// # Examples
///
/// ```rust
/// use page_capture::normalize_url;
///
/// let a = normalize_url("example.com").unwrap();
/// let b = normalize_url("HTTP://Example.com:80").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "http://example.com/");
/// ```
pub fn normalize_url(raw: &str) -> Result<NormalizedUrl, CaptureError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CaptureError::InvalidUrl("empty URL".to_string()));
    }

    let candidate = if has_scheme_prefix(trimmed) {
        trimmed.to_string()
    } else {
        format!("{DEFAULT_SCHEME_PREFIX}{trimmed}")
    };

    let parsed =
        Url::parse(&candidate).map_err(|e| CaptureError::InvalidUrl(format!("{raw}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CaptureError::InvalidUrl(format!(
                "unsupported scheme `{other}`"
            )))
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(CaptureError::InvalidUrl(format!("{raw}: missing host")));
    }

    Ok(NormalizedUrl(parsed))
}

fn has_scheme_prefix(input: &str) -> bool {
    match input.find("://") {
        Some(idx) if idx > 0 => input[..idx].chars().all(|c| c.is_ascii_alphabetic()),
        _ => false,
    }
}

/// Derives the cache key for `(url, format, length)`.
///
/// The length only participates for formats that use it, so a still capture
/// keys identically whatever length the client happened to send.
pub fn derive_key(url: &NormalizedUrl, format: CaptureFormat, length: Option<u8>) -> CacheKey {
    let length = if format.requires_length() {
        length.map(|l| l.to_string()).unwrap_or_default()
    } else {
        String::new()
    };

    let mut hasher = Sha256::new();
    hasher.update(url.as_str().as_bytes());
    hasher.update(KEY_SEPARATOR.as_bytes());
    hasher.update(format.key_tag().as_bytes());
    hasher.update(KEY_SEPARATOR.as_bytes());
    hasher.update(length.as_bytes());
    CacheKey(hex::encode(hasher.finalize()))
}
