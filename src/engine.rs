//! Rendering engine abstraction and the shared engine lifecycle.
//!
//! A [`RenderEngine`] hands out [`RenderSurface`]s, one per capture job. Jobs
//! hold their surface through a [`SurfaceGuard`] so it is released exactly once
//! on every exit path. The process-wide engine lives behind an [`EngineHandle`]
//! that request handlers consult for readiness.

use crate::{create_browser_config, CaptureError, Config, Viewport};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Opens a fresh, isolated surface.
    async fn open_surface(&self) -> Result<Box<dyn RenderSurface>, CaptureError>;

    async fn shutdown(&self) -> Result<(), CaptureError>;
}

/// One logical page inside the engine.
#[async_trait]
pub trait RenderSurface: Send {
    /// Loads `url` and waits until the page has settled.
    async fn navigate(&mut self, url: &str) -> Result<(), CaptureError>;

    /// Grabs a PNG frame, either the viewport or the whole page.
    async fn capture_frame(&mut self, full_page: bool) -> Result<Vec<u8>, CaptureError>;

    /// Releases the surface. Calling it again is a no-op.
    async fn close(&mut self) -> Result<(), CaptureError>;
}

/// Owns a surface for the duration of one job.
///
/// Prefer [`SurfaceGuard::close`]; if the guard is dropped instead (error or
/// panic unwinding), the close is spawned onto the current runtime.
pub struct SurfaceGuard {
    surface: Option<Box<dyn RenderSurface>>,
}

impl SurfaceGuard {
    pub async fn open(engine: &dyn RenderEngine) -> Result<Self, CaptureError> {
        let surface = engine.open_surface().await?;
        Ok(Self {
            surface: Some(surface),
        })
    }

    pub fn surface(&mut self) -> Result<&mut (dyn RenderSurface + 'static), CaptureError> {
        self.surface
            .as_deref_mut()
            .ok_or_else(|| CaptureError::Render("surface already released".to_string()))
    }

    pub async fn close(mut self) -> Result<(), CaptureError> {
        match self.surface.take() {
            Some(mut surface) => surface.close().await,
            None => Ok(()),
        }
    }
}

impl Drop for SurfaceGuard {
    fn drop(&mut self) {
        let Some(mut surface) = self.surface.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = surface.close().await {
                        warn!("Failed to release dropped surface: {}", e);
                    }
                });
            }
            Err(_) => warn!("Surface dropped outside a runtime; not released"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Uninitialized,
    Ready,
    ShuttingDown,
}

enum EngineState {
    Uninitialized,
    Ready(Arc<dyn RenderEngine>),
    ShuttingDown,
}

/// Shared, explicitly sequenced handle to the process-wide engine.
///
/// Lifecycle: `Uninitialized -> Ready -> ShuttingDown`. Capture requests are
/// only served in `Ready`.
#[derive(Clone)]
pub struct EngineHandle {
    state: Arc<RwLock<EngineState>>,
}

impl EngineHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(EngineState::Uninitialized)),
        }
    }

    /// Publishes a launched engine. Ignored once shutdown has begun.
    pub async fn mark_ready(&self, engine: Arc<dyn RenderEngine>) -> bool {
        let mut state = self.state.write().await;
        match *state {
            EngineState::ShuttingDown => false,
            _ => {
                *state = EngineState::Ready(engine);
                info!("Rendering engine ready");
                true
            }
        }
    }

    pub async fn get(&self) -> Result<Arc<dyn RenderEngine>, CaptureError> {
        match &*self.state.read().await {
            EngineState::Ready(engine) => Ok(engine.clone()),
            _ => Err(CaptureError::NotReady),
        }
    }

    pub async fn phase(&self) -> EnginePhase {
        match &*self.state.read().await {
            EngineState::Uninitialized => EnginePhase::Uninitialized,
            EngineState::Ready(_) => EnginePhase::Ready,
            EngineState::ShuttingDown => EnginePhase::ShuttingDown,
        }
    }

    pub async fn is_ready(&self) -> bool {
        self.phase().await == EnginePhase::Ready
    }

    /// Moves to `ShuttingDown` and returns the engine, if one was running.
    pub async fn begin_shutdown(&self) -> Option<Arc<dyn RenderEngine>> {
        let mut state = self.state.write().await;
        match std::mem::replace(&mut *state, EngineState::ShuttingDown) {
            EngineState::Ready(engine) => Some(engine),
            _ => None,
        }
    }
}

impl Default for EngineHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Headless Chromium driven over the DevTools protocol.
pub struct ChromiumEngine {
    browser: Mutex<Browser>,
    handler: Mutex<Option<JoinHandle<()>>>,
    viewport: Viewport,
    settle_delay: Duration,
}

impl ChromiumEngine {
    pub async fn launch(config: &Config) -> Result<Self, CaptureError> {
        let browser_config = create_browser_config(config)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| CaptureError::BrowserLaunchFailed(e.to_string()))?;

        // The handler stream must be polled for the browser to make progress.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
            info!("CDP handler stream ended");
        });

        info!(
            "Chromium launched (viewport {}x{})",
            config.viewport.width, config.viewport.height
        );

        Ok(Self {
            browser: Mutex::new(browser),
            handler: Mutex::new(Some(handler_task)),
            viewport: config.viewport.clone(),
            settle_delay: config.settle_delay(),
        })
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn open_surface(&self) -> Result<Box<dyn RenderSurface>, CaptureError> {
        let page = {
            let browser = self.browser.lock().await;
            browser
                .new_page("about:blank")
                .await
                .map_err(|e| CaptureError::Render(e.to_string()))?
        };

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(self.viewport.width))
            .height(i64::from(self.viewport.height))
            .device_scale_factor(self.viewport.device_scale_factor)
            .mobile(self.viewport.mobile)
            .build()
            .map_err(CaptureError::Render)?;

        if let Err(e) = page.execute(metrics).await {
            let _ = page.close().await;
            return Err(CaptureError::Render(e.to_string()));
        }

        Ok(Box::new(ChromiumSurface {
            page: Some(page),
            settle_delay: self.settle_delay,
        }))
    }

    async fn shutdown(&self) -> Result<(), CaptureError> {
        let mut browser = self.browser.lock().await;
        let closed = browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| CaptureError::Render(e.to_string()));
        let _ = browser.wait().await;

        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }

        info!("Chromium closed");
        closed
    }
}

struct ChromiumSurface {
    page: Option<Page>,
    settle_delay: Duration,
}

impl ChromiumSurface {
    fn page(&self) -> Result<&Page, CaptureError> {
        self.page
            .as_ref()
            .ok_or_else(|| CaptureError::Render("page already closed".to_string()))
    }
}

#[async_trait]
impl RenderSurface for ChromiumSurface {
    async fn navigate(&mut self, url: &str) -> Result<(), CaptureError> {
        let page = self.page()?;
        page.goto(url)
            .await
            .map_err(|e| CaptureError::Render(e.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| CaptureError::Render(e.to_string()))?;

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        Ok(())
    }

    async fn capture_frame(&mut self, full_page: bool) -> Result<Vec<u8>, CaptureError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();

        self.page()?
            .screenshot(params)
            .await
            .map_err(|e| CaptureError::Render(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), CaptureError> {
        match self.page.take() {
            Some(page) => page
                .close()
                .await
                .map_err(|e| CaptureError::Render(e.to_string())),
            None => Ok(()),
        }
    }
}
