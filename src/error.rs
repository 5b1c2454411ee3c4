use std::time::Duration;
use thiserror::Error;
use tokio::sync::AcquireError;
use tokio_rusqlite::rusqlite;

/// Message returned to clients for every internal capture failure.
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to capture.";

#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Missing Authorization header")]
    MissingCredential,

    #[error("Invalid or missing token")]
    InvalidCredential,

    #[error("Rendering engine is not ready")]
    NotReady,

    #[error("Navigation timed out after {0:?}")]
    RenderTimeout(Duration),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Capture gate closed: {0}")]
    GateClosed(String),
}

impl CaptureError {
    /// HTTP status this error maps to at the service boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            CaptureError::Validation(_) | CaptureError::InvalidUrl(_) => 400,
            CaptureError::MissingCredential => 401,
            CaptureError::InvalidCredential => 403,
            CaptureError::NotReady | CaptureError::GateClosed(_) => 503,
            _ => 500,
        }
    }

    /// Client-facing message. Internal failures collapse to a generic message so
    /// file-system paths and engine diagnostics stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            CaptureError::Validation(msg) => msg.clone(),
            CaptureError::InvalidUrl(_) => "Invalid URL.".to_string(),
            CaptureError::MissingCredential | CaptureError::InvalidCredential => self.to_string(),
            CaptureError::NotReady | CaptureError::GateClosed(_) => {
                "Rendering engine is not ready.".to_string()
            }
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CaptureError::Validation(_)
            | CaptureError::InvalidUrl(_)
            | CaptureError::MissingCredential
            | CaptureError::InvalidCredential => ErrorSeverity::Low,
            CaptureError::NotReady | CaptureError::Storage(_) => ErrorSeverity::Medium,
            CaptureError::BrowserLaunchFailed(_) | CaptureError::Configuration(_) => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<AcquireError> for CaptureError {
    fn from(err: AcquireError) -> Self {
        CaptureError::GateClosed(err.to_string())
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::Configuration(err.to_string())
    }
}

impl From<rusqlite::Error> for CaptureError {
    fn from(err: rusqlite::Error) -> Self {
        CaptureError::Storage(err.to_string())
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for CaptureError {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        CaptureError::Storage(err.to_string())
    }
}
