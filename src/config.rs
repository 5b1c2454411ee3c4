//! Configuration management with serde serialization/deserialization
//!
//! A [`Config`] starts from its defaults (or a JSON file), then command-line
//! flags and environment variables are layered on top by the CLI.

use crate::CaptureError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the capture service
///
/// # Examples
///
/// ```rust
/// use page_capture::{CacheBackend, Config};
///
/// let config = Config {
///     cache_backend: CacheBackend::Memory,
///     max_concurrent_captures: 2,
///     ..Default::default()
/// };
/// assert_eq!(config.cache_ttl_days, 30);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for artifacts, frame directories and the cache index
    pub storage_dir: PathBuf,

    /// Age in days after which cache entries expire (default: 30, 0 = never)
    pub cache_ttl_days: u32,

    /// Which cache index implementation to use (default: sqlite)
    pub cache_backend: CacheBackend,

    /// Maximum number of capture jobs running at once (default: CPU count)
    ///
    /// Requests beyond this limit wait in arrival order.
    pub max_concurrent_captures: usize,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// ffmpeg binary used to encode animated output (default: `ffmpeg` on PATH)
    pub ffmpeg_path: String,

    /// Shared bearer token. When unset, authentication is disabled.
    pub auth_token: Option<String>,

    pub bind_addr: String,

    pub port: u16,

    /// Upper bound on page navigation (default: 60 seconds)
    pub navigation_timeout_secs: u64,

    /// Extra wait after the load event so late network activity can settle
    pub settle_delay_ms: u64,

    /// Browser viewport used for every capture
    pub viewport: Viewport,

    /// Output settings for animated captures
    pub animation: AnimationSettings,

    /// How often expired cache entries are swept (default: 120 seconds)
    pub sweep_interval_secs: u64,

    /// Expose Prometheus metrics at `/metrics`
    pub metrics_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("/tmp/capture"),
            cache_ttl_days: 30,
            cache_backend: CacheBackend::Sqlite,
            max_concurrent_captures: num_cpus::get(),
            chrome_path: None,
            ffmpeg_path: "ffmpeg".to_string(),
            auth_token: None,
            bind_addr: "0.0.0.0".to_string(),
            port: 3000,
            navigation_timeout_secs: 60,
            settle_delay_ms: 500,
            viewport: Viewport::default(),
            animation: AnimationSettings::default(),
            sweep_interval_secs: 120,
            metrics_enabled: false,
        }
    }
}

impl Config {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Cache index implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local map; entries are lost on restart
    Memory,
    /// SQLite file in the storage directory
    Sqlite,
}

/// Browser viewport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Viewport {
    /// Viewport width in pixels (default: 1280)
    pub width: u32,

    /// Viewport height in pixels (default: 720)
    pub height: u32,

    /// Device pixel ratio (default: 1.0)
    pub device_scale_factor: f64,

    pub mobile: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device_scale_factor: 1.0,
            mobile: false,
        }
    }
}

/// Encoder settings for animated captures
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnimationSettings {
    /// Output frame width in pixels (default: 640)
    pub width: u32,

    /// Output frame height in pixels (default: 360)
    pub height: u32,

    /// Lossy WebP quality, 0-100 (default: 75)
    pub quality: u8,
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            quality: 75,
        }
    }
}

/// Rejects settings the service cannot run with.
pub fn validate_config(config: &Config) -> Result<(), CaptureError> {
    if config.max_concurrent_captures == 0 {
        return Err(CaptureError::Configuration(
            "max_concurrent_captures must be greater than 0".to_string(),
        ));
    }

    if config.navigation_timeout_secs == 0 {
        return Err(CaptureError::Configuration(
            "navigation_timeout_secs must be greater than 0".to_string(),
        ));
    }

    if config.viewport.width == 0 || config.viewport.height == 0 {
        return Err(CaptureError::Configuration(
            "viewport dimensions must be greater than 0".to_string(),
        ));
    }

    if config.animation.width == 0 || config.animation.height == 0 {
        return Err(CaptureError::Configuration(
            "animation dimensions must be greater than 0".to_string(),
        ));
    }

    if config.animation.quality > 100 {
        return Err(CaptureError::Configuration(
            "animation quality must be between 0 and 100".to_string(),
        ));
    }

    if config.sweep_interval_secs == 0 {
        return Err(CaptureError::Configuration(
            "sweep_interval_secs must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

/// Generate Chrome command-line arguments for headless capture
///
/// # Examples
///
/// ```rust
/// use page_capture::{Config, get_chrome_args};
///
/// let args = get_chrome_args(&Config::default());
/// assert!(args.contains(&"--headless".to_string()));
/// ```
pub fn get_chrome_args(config: &Config) -> Vec<String> {
    let unique_id = format!("{}-{}", std::process::id(), uuid::Uuid::new_v4());
    let temp_root = std::env::temp_dir();

    vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-extensions".to_string(),
        "--no-first-run".to_string(),
        "--hide-scrollbars".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
        format!(
            "--user-data-dir={}",
            temp_root.join(format!("page-capture-{unique_id}")).display()
        ),
    ]
}

pub fn create_browser_config(
    config: &Config,
) -> Result<chromiumoxide::browser::BrowserConfig, CaptureError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.viewport.width, config.viewport.height)
        .args(get_chrome_args(config));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(CaptureError::BrowserLaunchFailed)
}
