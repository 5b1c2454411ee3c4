//! Capture request value objects and query validation.

use crate::{normalize_url, CaptureError, NormalizedUrl};
use serde::{Deserialize, Serialize};

/// Frames sampled per second of animated output.
pub const FRAMES_PER_SECOND: u32 = 4;

/// Accepted range for the animated sequence length, in seconds.
pub const MIN_SEQUENCE_LENGTH: u8 = 1;
pub const MAX_SEQUENCE_LENGTH: u8 = 5;

/// Output format for a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    /// Single full-page PNG
    Still,
    /// Short looping animated WebP
    Animated,
}

impl CaptureFormat {
    /// Accepts the wire names (`png`, `webp`) as well as `still`/`animated`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" | "still" => Some(Self::Still),
            "webp" | "animated" => Some(Self::Animated),
            _ => None,
        }
    }

    pub fn requires_length(self) -> bool {
        matches!(self, Self::Animated)
    }

    /// Tag mixed into the cache key.
    pub fn key_tag(self) -> &'static str {
        self.extension()
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Still => "png",
            Self::Animated => "webp",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Still => "image/png",
            Self::Animated => "image/webp",
        }
    }
}

/// Raw `/capture` query parameters, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureQuery {
    pub url: Option<String>,
    pub format: Option<String>,
    pub length: Option<String>,
    pub nocache: Option<String>,
}

/// A validated capture request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    url: NormalizedUrl,
    format: CaptureFormat,
    sequence_length: Option<u8>,
    bypass_cache: bool,
}

impl CaptureRequest {
    pub fn new(
        raw_url: &str,
        format: CaptureFormat,
        sequence_length: Option<u8>,
        bypass_cache: bool,
    ) -> Result<Self, CaptureError> {
        let sequence_length = if format.requires_length() {
            match sequence_length {
                Some(len) if (MIN_SEQUENCE_LENGTH..=MAX_SEQUENCE_LENGTH).contains(&len) => {
                    Some(len)
                }
                Some(_) => return Err(length_out_of_range()),
                None => {
                    return Err(CaptureError::Validation(
                        "`length` is required for webp.".to_string(),
                    ))
                }
            }
        } else {
            None
        };

        Ok(Self {
            url: normalize_url(raw_url)?,
            format,
            sequence_length,
            bypass_cache,
        })
    }

    /// Validates query parameters. `nocache` counts as set whenever present,
    /// including with an empty value.
    pub fn from_query(query: CaptureQuery) -> Result<Self, CaptureError> {
        let url = query
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| CaptureError::Validation("`url` is required.".to_string()))?;

        let format = match query.format.as_deref() {
            None => CaptureFormat::Still,
            Some(raw) => CaptureFormat::parse(raw).ok_or_else(|| {
                CaptureError::Validation("`format` must be \"png\" or \"webp\".".to_string())
            })?,
        };

        let length = if format.requires_length() {
            let raw = query.length.ok_or_else(|| {
                CaptureError::Validation("`length` is required for webp.".to_string())
            })?;
            Some(parse_length(&raw).ok_or_else(length_out_of_range)?)
        } else {
            None
        };

        Self::new(&url, format, length, query.nocache.is_some())
    }

    pub fn url(&self) -> &NormalizedUrl {
        &self.url
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    pub fn sequence_length(&self) -> Option<u8> {
        self.sequence_length
    }

    pub fn bypass_cache(&self) -> bool {
        self.bypass_cache
    }

    /// Number of frames an animated capture samples; zero for stills.
    pub fn frame_count(&self) -> usize {
        self.sequence_length
            .map_or(0, |len| len as usize * FRAMES_PER_SECOND as usize)
    }
}

/// Parses a whole number of seconds. Integral decimals such as `3.0` are
/// accepted; fractions, non-finite values and out-of-range numbers are not.
fn parse_length(raw: &str) -> Option<u8> {
    let value = raw.trim().parse::<f64>().ok()?;
    if !value.is_finite() || value.fract() != 0.0 {
        return None;
    }
    if value < f64::from(MIN_SEQUENCE_LENGTH) || value > f64::from(MAX_SEQUENCE_LENGTH) {
        return None;
    }
    Some(value as u8)
}

fn length_out_of_range() -> CaptureError {
    CaptureError::Validation(format!(
        "`length` must be integer {MIN_SEQUENCE_LENGTH}-{MAX_SEQUENCE_LENGTH}."
    ))
}
