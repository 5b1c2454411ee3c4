use crate::{AnimationSettings, CaptureError, FRAMES_PER_SECOND};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// printf-style pattern the sampler names frames with.
pub const FRAME_PATTERN: &str = "frame-%03d.png";

pub fn frame_file_name(index: usize) -> String {
    format!("frame-{index:03}.png")
}

/// Everything needed to turn a frame directory into one animated file.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeJob {
    pub frame_dir: PathBuf,
    pub frame_count: usize,
    pub fps: u32,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

impl EncodeJob {
    pub fn new(frame_dir: &Path, frame_count: usize, output: &Path, settings: &AnimationSettings) -> Self {
        Self {
            frame_dir: frame_dir.to_path_buf(),
            frame_count,
            fps: FRAMES_PER_SECOND,
            output: output.to_path_buf(),
            width: settings.width,
            height: settings.height,
            quality: settings.quality,
        }
    }

    pub fn input_pattern(&self) -> PathBuf {
        self.frame_dir.join(FRAME_PATTERN)
    }
}

/// Converts an ordered frame sequence into an animated artifact.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, job: &EncodeJob) -> Result<(), CaptureError>;
}

/// Encodes looping lossy WebP with the system `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: String,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn build_args(job: &EncodeJob) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-framerate".to_string(),
            job.fps.to_string(),
            "-i".to_string(),
            job.input_pattern().display().to_string(),
            "-frames:v".to_string(),
            job.frame_count.to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", job.width, job.height),
            "-an".to_string(),
            "-vcodec".to_string(),
            "libwebp".to_string(),
            "-lossless".to_string(),
            "0".to_string(),
            "-quality".to_string(),
            job.quality.to_string(),
            "-loop".to_string(),
            "0".to_string(),
            "-f".to_string(),
            "webp".to_string(),
            job.output.display().to_string(),
        ]
    }

    /// True when the configured binary answers `-version`.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, job: &EncodeJob) -> Result<(), CaptureError> {
        let args = Self::build_args(job);
        debug!("Running {} {}", self.ffmpeg_path, args.join(" "));

        let output = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CaptureError::Encode(format!("failed to spawn {}: {e}", self.ffmpeg_path)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Encode(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}
