//! The tile-fetch seam and the retry policy applied around it.

use crate::grid::{Extent, TileDescriptor};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Network trouble, timeouts, 5xx: worth another attempt.
    Transient,
    /// The server said no (4xx, wrong content): retrying will not help.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} fetch error: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FetchErrorKind::Transient
    }
}

/// Everything needed to request one tile image.
#[derive(Debug, Clone, Copy)]
pub struct TileRequest<'a> {
    pub layer: &'a str,
    pub bbox: Extent,
    pub crs: &'a str,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub timestamp: DateTime<Utc>,
}

impl<'a> TileRequest<'a> {
    pub fn for_tile(tile: &'a TileDescriptor, timestamp: DateTime<Utc>) -> Self {
        Self {
            layer: &tile.layer_name,
            bbox: tile.bbox,
            crs: &tile.crs,
            pixel_width: tile.pixel_width,
            pixel_height: tile.pixel_height,
            timestamp,
        }
    }
}

/// Source of raw tile images.
///
/// Implementations must bound each call by a timeout and report it as a
/// transient error.
pub trait TileFetcher: Send + Sync {
    fn fetch_tile(&self, request: &TileRequest<'_>) -> Result<Vec<u8>, FetchError>;

    /// Where the request would go; shown in dry-run output.
    fn describe(&self, request: &TileRequest<'_>) -> Option<String> {
        let _ = request;
        None
    }
}

/// Cooperative cancellation shared with a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Retry without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    Failed { error: FetchError, attempts: u32 },
    Cancelled,
}

/// Fetch one tile, retrying transient errors per `policy`.
pub fn fetch_with_retry(
    fetcher: &dyn TileFetcher,
    request: &TileRequest<'_>,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<Vec<u8>, FetchFailure> {
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchFailure::Cancelled);
        }
        attempt += 1;
        match fetcher.fetch_tile(request) {
            Ok(bytes) => {
                if attempt > 1 {
                    debug!(layer = request.layer, attempt, "tile fetched after retry");
                }
                return Ok(bytes);
            }
            Err(error) if error.is_transient() && attempt < max_attempts => {
                warn!(
                    layer = request.layer,
                    attempt,
                    max_attempts,
                    error = %error.message,
                    "transient fetch failure, retrying in {:?}",
                    delay
                );
                thread::sleep(delay);
                delay = delay.mul_f64(policy.factor).min(policy.max_delay);
            }
            Err(error) => {
                return Err(FetchFailure::Failed {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}
