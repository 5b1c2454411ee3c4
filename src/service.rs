//! Capture orchestration: cache lookup, admission, detached job execution and
//! expiry sweeping.

use crate::{
    derive_key, CacheKey, CacheStore, CaptureError, CaptureFormat, CaptureJob, CaptureRequest,
    CaptureSettings, ConcurrencyGate, Encoder, EngineHandle, Metrics,
};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// A servable capture result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub format: CaptureFormat,
    pub cache_hit: bool,
}

impl Artifact {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub entries_expired: usize,
    pub files_removed: usize,
}

#[derive(Clone)]
pub struct CaptureService {
    engine: EngineHandle,
    cache: Arc<dyn CacheStore>,
    encoder: Arc<dyn Encoder>,
    gate: ConcurrencyGate,
    settings: CaptureSettings,
    metrics: Metrics,
}

impl CaptureService {
    pub fn new(
        engine: EngineHandle,
        cache: Arc<dyn CacheStore>,
        encoder: Arc<dyn Encoder>,
        gate: ConcurrencyGate,
        settings: CaptureSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            engine,
            cache,
            encoder,
            gate,
            settings,
            metrics,
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Serves `request` from the cache, or renders it.
    ///
    /// Cache hits never touch the gate. A miss waits for a gate slot, then runs
    /// the job in its own task so a disconnecting client cannot abort it.
    pub async fn capture(&self, request: CaptureRequest) -> Result<Artifact, CaptureError> {
        let format = request.format();
        let key = derive_key(request.url(), format, request.sequence_length());

        if !request.bypass_cache() {
            if let Some(path) = self.lookup(&key).await {
                debug!("Cache hit {} for {}", key, request.url());
                self.metrics.record_lookup(true);
                return Ok(Artifact {
                    path,
                    format,
                    cache_hit: true,
                });
            }
            self.metrics.record_lookup(false);
        }

        let engine = self.engine.get().await?;
        let permit = self.gate.acquire().await?;

        let mut job = CaptureJob::new(key, request, self.settings.clone());
        let encoder = self.encoder.clone();
        let cache = self.cache.clone();
        let metrics = self.metrics.clone();

        let task = tokio::spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            metrics.active_captures.increment(1.0);

            let result = job
                .run(engine.as_ref(), encoder.as_ref(), cache.as_ref())
                .await;

            metrics.active_captures.decrement(1.0);
            metrics.record_capture(started.elapsed(), result.is_ok());
            result
        });

        let outcome = task
            .await
            .map_err(|e| CaptureError::Render(format!("capture task aborted: {e}")))??;

        Ok(Artifact {
            path: outcome.path,
            format,
            cache_hit: false,
        })
    }

    /// Resolves a live entry to its artifact. An entry whose file has gone
    /// missing is dropped and reported as a miss.
    async fn lookup(&self, key: &CacheKey) -> Option<PathBuf> {
        let filename = match self.cache.get(key).await {
            Ok(found) => found?,
            Err(e) => {
                warn!("Cache lookup for {} failed: {}", key, e);
                return None;
            }
        };

        let path = self.settings.storage_dir.join(&filename);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }

        warn!("Cached artifact {} is missing; evicting {}", filename, key);
        if let Err(e) = self.cache.remove(key).await {
            warn!("Failed to evict {}: {}", key, e);
        }
        None
    }

    /// Removes expired entries and their artifacts. Files whose key has been
    /// captured again since expiring are left in place, including a capture
    /// that has published its file but not yet re-indexed it.
    pub async fn sweep_expired(&self) -> Result<SweepReport, CaptureError> {
        let expired = self.cache.sweep_expired().await?;
        let mut report = SweepReport {
            entries_expired: expired.len(),
            files_removed: 0,
        };

        for entry in &expired {
            if let Ok(Some(current)) = self.cache.get(&entry.key).await {
                if current == entry.filename {
                    continue;
                }
            }

            let path = self.settings.storage_dir.join(&entry.filename);
            match written_after(&path, entry.created_at).await {
                Ok(false) => {}
                Ok(true) => {
                    debug!("Keeping {}: republished after its entry expired", path.display());
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("Failed to inspect expired artifact {}: {}", path.display(), e);
                    continue;
                }
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => report.files_removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete expired artifact {}: {}", path.display(), e),
            }
        }

        self.metrics.record_sweep(report.entries_expired);
        if report.entries_expired > 0 {
            info!(
                "Swept {} expired cache entries ({} files removed)",
                report.entries_expired, report.files_removed
            );
        }
        Ok(report)
    }

    /// Runs [`Self::sweep_expired`] every `period` until the task is aborted.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = service.sweep_expired().await {
                    error!("Periodic cache sweep failed: {}", e);
                }
            }
        })
    }
}

/// Whether the file at `path` was modified after `created_at`, give or take
/// filesystem timestamp granularity. Jobs publish before indexing, so an
/// artifact that simply aged out never qualifies.
async fn written_after(path: &Path, created_at: DateTime<Utc>) -> std::io::Result<bool> {
    let modified: DateTime<Utc> = tokio::fs::metadata(path).await?.modified()?.into();
    Ok(created_at
        .checked_add_signed(chrono::Duration::seconds(1))
        .is_some_and(|limit| modified > limit))
}
