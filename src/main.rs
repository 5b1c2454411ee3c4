use anyhow::Context;
use clap::Parser;
use page_capture::{
    build_router, install_prometheus, open_store, setup_logging, AppState, BearerAuth, CacheStore,
    CaptureService, CaptureSettings, ChromiumEngine, Cli, Commands, ConcurrencyGate, Config,
    EngineHandle, FfmpegEncoder, Metrics, RenderEngine,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose).map_err(|e| anyhow::anyhow!("failed to set up logging: {e}"))?;

    info!("Starting page-capture v{}", env!("CARGO_PKG_VERSION"));

    let config = args.load_config().await.context("invalid configuration")?;

    match args.command() {
        Commands::Validate => {
            let mut printable = config.clone();
            if printable.auth_token.is_some() {
                printable.auth_token = Some("<redacted>".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&printable)?);
            Ok(())
        }
        Commands::Sweep => run_sweep(config).await,
        Commands::Serve => run_server(config).await,
    }
}

fn build_service(
    config: &Config,
    engine: EngineHandle,
    cache: Arc<dyn CacheStore>,
    metrics: Metrics,
) -> CaptureService {
    CaptureService::new(
        engine,
        cache,
        Arc::new(FfmpegEncoder::new(config.ffmpeg_path.clone())),
        ConcurrencyGate::new(config.max_concurrent_captures),
        CaptureSettings::from_config(config),
        metrics,
    )
}

async fn prepare_storage(config: &Config) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.storage_dir)
        .await
        .with_context(|| format!("failed to create {}", config.storage_dir.display()))
}

async fn run_sweep(config: Config) -> anyhow::Result<()> {
    prepare_storage(&config).await?;
    let cache = open_store(&config).await.context("failed to open cache store")?;
    let service = build_service(&config, EngineHandle::new(), cache, Metrics::noop());

    let report = service.sweep_expired().await.context("cache sweep failed")?;
    info!(
        "Sweep complete: {} expired entries, {} files removed",
        report.entries_expired, report.files_removed
    );
    Ok(())
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    prepare_storage(&config).await?;

    let prometheus = if config.metrics_enabled {
        Some(install_prometheus()?)
    } else {
        None
    };
    let metrics = Metrics::new();

    let cache = open_store(&config).await.context("failed to open cache store")?;
    let engine = EngineHandle::new();
    let service = build_service(&config, engine.clone(), cache, metrics);

    if let Err(e) = service.sweep_expired().await {
        warn!("Startup cache sweep failed: {}", e);
    }
    let sweeper = service.spawn_sweeper(config.sweep_interval());

    let encoder = FfmpegEncoder::new(config.ffmpeg_path.clone());
    if !encoder.is_available().await {
        warn!(
            "{} is not runnable; animated captures will fail",
            config.ffmpeg_path
        );
    }

    // Requests get 503 until the browser is up.
    let launcher = {
        let engine = engine.clone();
        let config = config.clone();
        tokio::spawn(async move {
            match ChromiumEngine::launch(&config).await {
                Ok(chromium) => {
                    let chromium = Arc::new(chromium);
                    if !engine.mark_ready(chromium.clone()).await {
                        let _ = chromium.shutdown().await;
                    }
                }
                Err(e) => {
                    error!("Failed to launch rendering engine: {}", e);
                    std::process::exit(1);
                }
            }
        })
    };

    let state = AppState {
        service: service.clone(),
        prometheus,
    };
    let router = build_router(state, BearerAuth::new(config.auth_token.as_deref()));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutting down...");
    launcher.abort();
    sweeper.abort();
    service.gate().close();

    if let Some(engine) = engine.begin_shutdown().await {
        if let Err(e) = engine.shutdown().await {
            warn!("Rendering engine did not close cleanly: {}", e);
        }
    }

    info!("page-capture stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
