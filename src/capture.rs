//! Per-request capture job.
//!
//! A job walks `Pending -> Navigating -> (Screenshotting | Sampling) ->
//! [Encoding] -> Persisting -> Done`, or drops into `Failed` from any
//! non-terminal state. The rendering surface is released before encoding
//! starts, and on every failure path. Frame directories are removed whatever
//! the outcome.

use crate::encoder::{frame_file_name, EncodeJob, Encoder};
use crate::{
    AnimationSettings, CacheKey, CacheStore, CaptureError, CaptureFormat, CaptureRequest, Config,
    RenderEngine, RenderSurface, SurfaceGuard, FRAMES_PER_SECOND,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Navigating,
    Screenshotting,
    Sampling,
    Encoding,
    Persisting,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, Navigating)
            | (Navigating, Screenshotting)
            | (Navigating, Sampling)
            | (Screenshotting, Persisting)
            | (Sampling, Encoding)
            | (Encoding, Persisting)
            | (Persisting, Done) => true,
            _ => false,
        }
    }
}

/// Settings a job needs from the service configuration.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub storage_dir: PathBuf,
    pub navigation_timeout: Duration,
    pub animation: AnimationSettings,
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            storage_dir: config.storage_dir.clone(),
            navigation_timeout: config.navigation_timeout(),
            animation: config.animation.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    /// Absolute path of the published artifact
    pub path: PathBuf,
    /// Artifact name relative to the storage root, as stored in the cache
    pub filename: String,
    pub frames_sampled: usize,
}

enum Rendered {
    Still(Vec<u8>),
    Frames { dir: TempDir, count: usize },
}

/// Time between two sampled frames.
pub fn frame_interval() -> Duration {
    Duration::from_millis(1000 / u64::from(FRAMES_PER_SECOND))
}

pub fn artifact_file_name(key: &CacheKey, format: CaptureFormat) -> String {
    format!("{}.{}", key, format.extension())
}

pub struct CaptureJob {
    key: CacheKey,
    request: CaptureRequest,
    settings: CaptureSettings,
    state: JobState,
    history: Vec<JobState>,
}

impl CaptureJob {
    pub fn new(key: CacheKey, request: CaptureRequest, settings: CaptureSettings) -> Self {
        Self {
            key,
            request,
            settings,
            state: JobState::Pending,
            history: vec![JobState::Pending],
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Every state the job has been in, in order.
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("Job {}: {:?} -> {:?}", self.key, self.state, next);
        self.state = next;
        self.history.push(next);
    }

    pub async fn run(
        &mut self,
        engine: &dyn RenderEngine,
        encoder: &dyn Encoder,
        cache: &dyn CacheStore,
    ) -> Result<CaptureOutcome, CaptureError> {
        match self.execute(engine, encoder, cache).await {
            Ok(outcome) => {
                self.transition(JobState::Done);
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    "Capture {} for {} failed in {:?}: {}",
                    self.key,
                    self.request.url(),
                    self.state,
                    e
                );
                self.transition(JobState::Failed);
                Err(e)
            }
        }
    }

    async fn execute(
        &mut self,
        engine: &dyn RenderEngine,
        encoder: &dyn Encoder,
        cache: &dyn CacheStore,
    ) -> Result<CaptureOutcome, CaptureError> {
        self.transition(JobState::Navigating);
        let mut guard = SurfaceGuard::open(engine).await?;

        let rendered = match guard.surface() {
            Ok(surface) => self.render(surface).await,
            Err(e) => Err(e),
        };

        if let Err(e) = guard.close().await {
            warn!("Failed to release surface for {}: {}", self.key, e);
        }

        let filename = artifact_file_name(&self.key, self.request.format());
        let path = self.settings.storage_dir.join(&filename);

        let frames_sampled = match rendered? {
            Rendered::Still(png) => {
                publish_bytes(&png, &path).await?;
                0
            }
            Rendered::Frames { dir, count } => {
                self.transition(JobState::Encoding);
                self.encode(encoder, dir, count, &path).await?;
                count
            }
        };

        self.transition(JobState::Persisting);
        if let Err(e) = cache.set(&self.key, &filename).await {
            warn!("Cache index write for {} failed: {}", self.key, e);
        }

        Ok(CaptureOutcome {
            path,
            filename,
            frames_sampled,
        })
    }

    async fn render(&mut self, surface: &mut dyn RenderSurface) -> Result<Rendered, CaptureError> {
        let limit = self.settings.navigation_timeout;
        match timeout(limit, surface.navigate(self.request.url().as_str())).await {
            Ok(result) => result?,
            Err(_) => return Err(CaptureError::RenderTimeout(limit)),
        }

        match self.request.format() {
            CaptureFormat::Still => {
                self.transition(JobState::Screenshotting);
                Ok(Rendered::Still(surface.capture_frame(true).await?))
            }
            CaptureFormat::Animated => {
                self.transition(JobState::Sampling);
                let dir = tempfile::Builder::new()
                    .prefix(&format!("frames-{}-", self.key))
                    .tempdir_in(&self.settings.storage_dir)?;
                let count = sample_frames(surface, dir.path(), self.request.frame_count()).await?;
                Ok(Rendered::Frames { dir, count })
            }
        }
    }

    async fn encode(
        &self,
        encoder: &dyn Encoder,
        dir: TempDir,
        count: usize,
        path: &Path,
    ) -> Result<(), CaptureError> {
        let staging = staging_path(path);
        let job = EncodeJob::new(dir.path(), count, &staging, &self.settings.animation);
        let encoded = encoder.encode(&job).await;

        if let Err(e) = dir.close() {
            warn!("Failed to remove frame directory for {}: {}", self.key, e);
        }

        match encoded {
            Ok(()) => publish(&staging, path).await,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                Err(e)
            }
        }
    }
}

/// Captures exactly `frame_count` viewport frames at the fixed sampling rate.
///
/// Termination is by count, so slow frame grabs delay the sequence instead of
/// shortening it.
pub async fn sample_frames(
    surface: &mut dyn RenderSurface,
    dir: &Path,
    frame_count: usize,
) -> Result<usize, CaptureError> {
    let mut ticker = interval(frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut captured = 0;
    while captured < frame_count {
        ticker.tick().await;
        let png = surface.capture_frame(false).await?;
        tokio::fs::write(dir.join(frame_file_name(captured)), png).await?;
        captured += 1;
    }
    Ok(captured)
}

fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
}

async fn publish_bytes(bytes: &[u8], target: &Path) -> Result<(), CaptureError> {
    let staging = staging_path(target);
    if let Err(e) = tokio::fs::write(&staging, bytes).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e.into());
    }
    publish(&staging, target).await
}

/// Renames a finished staging file over `target`.
async fn publish(staging: &Path, target: &Path) -> Result<(), CaptureError> {
    if let Err(e) = tokio::fs::rename(staging, target).await {
        let _ = tokio::fs::remove_file(staging).await;
        return Err(e.into());
    }
    Ok(())
}
