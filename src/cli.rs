use crate::{validate_config, CacheBackend, CaptureError, Config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "page-capture")]
#[command(about = "Web page capture service with a persistent artifact cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(long, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "TMP_DIR", help = "Directory for artifacts and the cache index")]
    pub storage_dir: Option<PathBuf>,

    #[arg(long, env = "CACHE_TTL_DAYS", help = "Cache entry lifetime in days (0 = never expire)")]
    pub cache_ttl_days: Option<u32>,

    #[arg(long, env = "CACHE_BACKEND", value_enum, help = "Cache index backend")]
    pub cache_backend: Option<CacheBackend>,

    #[arg(long, env = "MAX_CONCURRENT_CAPTURES", help = "Maximum concurrent capture jobs")]
    pub max_concurrent: Option<usize>,

    #[arg(long, env = "CHROME_PATH", help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, env = "FFMPEG_PATH", help = "ffmpeg executable path")]
    pub ffmpeg_path: Option<String>,

    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true, help = "Bearer token required on /capture")]
    pub auth_token: Option<String>,

    #[arg(long, env = "BIND_ADDR", help = "Bind address")]
    pub bind: Option<String>,

    #[arg(long, env = "PORT", help = "Listen port")]
    pub port: Option<u16>,

    #[arg(long, env = "NAVIGATION_TIMEOUT_SECS", help = "Page navigation timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, env = "METRICS_ENABLED", help = "Expose Prometheus metrics at /metrics")]
    pub metrics: bool,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the HTTP capture service (default)
    Serve,

    /// Remove expired cache entries and their artifacts, then exit
    Sweep,

    /// Print the effective configuration and exit
    Validate,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Serve)
    }

    /// Loads the config file (or defaults), applies flag and environment
    /// overrides, then validates the result.
    pub async fn load_config(&self) -> Result<Config, CaptureError> {
        let mut config = match &self.config {
            Some(path) => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    CaptureError::Configuration(format!("{}: {e}", path.display()))
                })?;
                serde_json::from_str(&content)?
            }
            None => Config::default(),
        };

        self.apply_overrides(&mut config);
        validate_config(&config)?;

        info!("Configuration loaded successfully");
        info!("Storage directory: {}", config.storage_dir.display());
        info!(
            "Cache: backend={:?}, ttl_days={}",
            config.cache_backend, config.cache_ttl_days
        );
        info!("Max concurrent captures: {}", config.max_concurrent_captures);
        info!("Navigation timeout: {:?}", config.navigation_timeout());
        info!(
            "Authentication: {}",
            if config.auth_token.is_some() { "enabled" } else { "disabled" }
        );

        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(dir) = &self.storage_dir {
            config.storage_dir = dir.clone();
        }

        if let Some(days) = self.cache_ttl_days {
            config.cache_ttl_days = days;
        }

        if let Some(backend) = self.cache_backend {
            config.cache_backend = backend;
        }

        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent_captures = max_concurrent;
        }

        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }

        if let Some(ffmpeg_path) = &self.ffmpeg_path {
            config.ffmpeg_path = ffmpeg_path.clone();
        }

        if let Some(token) = self.auth_token.as_deref().filter(|t| !t.is_empty()) {
            config.auth_token = Some(token.to_string());
        }

        if let Some(bind) = &self.bind {
            config.bind_addr = bind.clone();
        }

        if let Some(port) = self.port {
            config.port = port;
        }

        if let Some(timeout) = self.timeout {
            config.navigation_timeout_secs = timeout;
        }

        if self.metrics {
            config.metrics_enabled = true;
        }
    }
}

/// Installs the global fmt subscriber. `RUST_LOG` wins over `--verbose`.
pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_serve() {
        let cli = Cli::try_parse_from(["page-capture"]).unwrap();
        assert_eq!(cli.command(), Commands::Serve);

        let cli = Cli::try_parse_from(["page-capture", "sweep"]).unwrap();
        assert_eq!(cli.command(), Commands::Sweep);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "page-capture",
            "--storage-dir",
            "/var/lib/capture",
            "--cache-ttl-days",
            "0",
            "--cache-backend",
            "memory",
            "--max-concurrent",
            "3",
            "--port",
            "8080",
            "--timeout",
            "15",
            "--auth-token",
            "s3cret",
            "--metrics",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.storage_dir, PathBuf::from("/var/lib/capture"));
        assert_eq!(config.cache_ttl_days, 0);
        assert_eq!(config.cache_backend, CacheBackend::Memory);
        assert_eq!(config.max_concurrent_captures, 3);
        assert_eq!(config.port, 8080);
        assert_eq!(config.navigation_timeout_secs, 15);
        assert_eq!(config.auth_token.as_deref(), Some("s3cret"));
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert!(Cli::try_parse_from(["page-capture", "--cache-backend", "redis"]).is_err());
    }

    #[tokio::test]
    async fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 9000, "cache_ttl_days": 7}"#).unwrap();

        let cli = Cli::try_parse_from([
            "page-capture",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9100",
        ])
        .unwrap();
        let config = cli.load_config().await.unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.cache_ttl_days, 7);
    }

    #[tokio::test]
    async fn test_load_config_rejects_invalid() {
        let cli = Cli::try_parse_from(["page-capture", "--max-concurrent", "0"]).unwrap();
        assert!(matches!(
            cli.load_config().await,
            Err(CaptureError::Configuration(_))
        ));
    }
}
