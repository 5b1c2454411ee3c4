//! In-process render engine and encoder doubles for tests.

use crate::cache::Clock;
use crate::encoder::MockEncoder;
use crate::{CaptureError, RenderEngine, RenderSurface};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Smallest valid PNG (1x1, RGBA).
pub const PNG_1X1: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0x64, 0x60, 0xf8, 0x5f,
    0x0f, 0x00, 0x02, 0x87, 0x01, 0x80, 0xeb, 0x47, 0xba, 0x92, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45,
    0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Bytes the fake encoder writes as its "animation".
pub const FAKE_WEBP: &[u8] = b"RIFF\x00\x00\x00\x00WEBPVP8 ";

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.millis
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct SurfaceStats {
    opens: AtomicUsize,
    closes: AtomicUsize,
    navigations: AtomicUsize,
    frames: AtomicUsize,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
}

impl SurfaceStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn open_surfaces(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    pub fn max_open_surfaces(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    stats: Arc<SurfaceStats>,
    navigate_delay: Duration,
    frame_delay: Duration,
    fail_navigation: bool,
    fail_frame_at: Option<usize>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_navigate_delay(mut self, delay: Duration) -> Self {
        self.navigate_delay = delay;
        self
    }

    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    /// Makes the `n`th frame (1-based) of every surface fail to capture.
    pub fn failing_frame_at(mut self, n: usize) -> Self {
        self.fail_frame_at = Some(n);
        self
    }

    pub fn stats(&self) -> &SurfaceStats {
        &self.stats
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn open_surface(&self) -> Result<Box<dyn RenderSurface>, CaptureError> {
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.stats.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_open.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(FakeSurface {
            stats: self.stats.clone(),
            navigate_delay: self.navigate_delay,
            frame_delay: self.frame_delay,
            fail_navigation: self.fail_navigation,
            fail_frame_at: self.fail_frame_at,
            frames_taken: 0,
            closed: false,
        }))
    }

    async fn shutdown(&self) -> Result<(), CaptureError> {
        Ok(())
    }
}

struct FakeSurface {
    stats: Arc<SurfaceStats>,
    navigate_delay: Duration,
    frame_delay: Duration,
    fail_navigation: bool,
    fail_frame_at: Option<usize>,
    frames_taken: usize,
    closed: bool,
}

#[async_trait]
impl RenderSurface for FakeSurface {
    async fn navigate(&mut self, _url: &str) -> Result<(), CaptureError> {
        if !self.navigate_delay.is_zero() {
            tokio::time::sleep(self.navigate_delay).await;
        }
        self.stats.navigations.fetch_add(1, Ordering::SeqCst);
        if self.fail_navigation {
            return Err(CaptureError::Render("net::ERR_NAME_NOT_RESOLVED".to_string()));
        }
        Ok(())
    }

    async fn capture_frame(&mut self, _full_page: bool) -> Result<Vec<u8>, CaptureError> {
        if !self.frame_delay.is_zero() {
            tokio::time::sleep(self.frame_delay).await;
        }
        self.frames_taken += 1;
        if self.fail_frame_at == Some(self.frames_taken) {
            return Err(CaptureError::Render("Target closed".to_string()));
        }
        self.stats.frames.fetch_add(1, Ordering::SeqCst);
        Ok(PNG_1X1.to_vec())
    }

    async fn close(&mut self) -> Result<(), CaptureError> {
        if !self.closed {
            self.closed = true;
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
            self.stats.open_now.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Encoder double that writes [`FAKE_WEBP`] to the requested output.
pub fn writing_encoder() -> MockEncoder {
    let mut encoder = MockEncoder::new();
    encoder.expect_encode().returning(|job| {
        std::fs::write(&job.output, FAKE_WEBP).map_err(CaptureError::from)
    });
    encoder
}

/// Encoder double that always fails.
pub fn failing_encoder() -> MockEncoder {
    let mut encoder = MockEncoder::new();
    encoder
        .expect_encode()
        .returning(|_| Err(CaptureError::Encode("libwebp missing".to_string())));
    encoder
}
