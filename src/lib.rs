//! # Page Capture
//!
//! An HTTP service that renders web pages in headless Chromium and returns
//! either a full-page PNG or a short looping animated WebP. Results are kept in
//! a content-addressed cache so repeat requests are served from disk.
//!
//! ## Request flow
//!
//! 1. `GET /capture?url=&format=&length=&nocache=` is authenticated (when a
//!    token is configured) and validated into a [`CaptureRequest`].
//! 2. The request is keyed with [`derive_key`] and looked up in the
//!    [`CacheStore`]. Hits are served immediately.
//! 3. Misses wait on the [`ConcurrencyGate`], then run a [`CaptureJob`] that
//!    drives a [`RenderSurface`] and, for animations, the [`Encoder`].
//! 4. The artifact is published atomically and registered in the cache.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use page_capture::{derive_key, CaptureFormat, CaptureRequest};
//!
//! let request = CaptureRequest::new("example.com", CaptureFormat::Animated, Some(3), false)?;
//! assert_eq!(request.frame_count(), 12);
//!
//! let key = derive_key(request.url(), request.format(), request.sequence_length());
//! assert_eq!(key.as_str().len(), 64);
//! # Ok::<(), page_capture::CaptureError>(())
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! # Serve on :3000 with a SQLite-backed cache in /tmp/capture
//! page-capture
//!
//! # One-shot expiry sweep
//! CACHE_TTL_DAYS=7 page-capture sweep
//! ```

/// Configuration and settings for the capture service
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// URL normalization and cache key derivation
pub mod key;

/// Capture request validation
pub mod request;

/// Cache index backends
pub mod cache;

/// Admission control for capture jobs
pub mod gate;

/// Rendering engine abstraction and Chromium implementation
pub mod engine;

/// Animated output encoding
pub mod encoder;

/// Per-request capture state machine
pub mod capture;

/// Capture orchestration and cache sweeping
pub mod service;

/// Bearer token authentication
pub mod auth;

/// HTTP routes
pub mod server;

/// Command-line interface implementation
pub mod cli;

/// Performance metrics collection
pub mod telemetry;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod tests;

pub use auth::*;
pub use cache::{open_store, CacheEntry, CacheStore, CacheTtl, Clock, SystemClock};
pub use capture::*;
pub use cli::*;
pub use config::*;
pub use encoder::{EncodeJob, Encoder, FfmpegEncoder};
pub use engine::*;
pub use error::*;
pub use gate::*;
pub use key::*;
pub use request::*;
pub use server::*;
pub use service::*;
pub use telemetry::*;
