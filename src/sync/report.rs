//! End-of-run summary.

use crate::state::format_instant;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

/// A tile a dry run would have fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedFetch {
    pub timestamp: DateTime<Utc>,
    pub tile_index: usize,
    pub path: PathBuf,
    pub url: Option<String>,
}

/// Which step of a timestamp gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// The fetcher failed for this tile.
    Fetch { tile_index: usize, attempts: u32 },
    /// The tile could not be stored or read back from disk.
    Store { tile_index: usize },
    /// Every tile is on disk but the manifest could not be written.
    Manifest,
}

/// Why a timestamp was abandoned.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampFailure {
    pub timestamp: DateTime<Utc>,
    pub stage: FailureStage,
    pub error: String,
}

impl TimestampFailure {
    /// The tile at fault, if a single tile was.
    pub fn tile_index(&self) -> Option<usize> {
        match self.stage {
            FailureStage::Fetch { tile_index, .. } | FailureStage::Store { tile_index } => Some(tile_index),
            FailureStage::Manifest => None,
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch { tile_index, attempts } => {
                write!(f, "tile {tile_index} after {attempts} attempt(s)")
            }
            Self::Store { tile_index } => write!(f, "storing tile {tile_index}"),
            Self::Manifest => write!(f, "writing the manifest"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerReport {
    pub layer: String,
    pub pending_timestamps: usize,
    pub committed_timestamps: usize,
    pub fetched: usize,
    /// Already on disk from an earlier, interrupted run.
    pub skipped: usize,
    pub failed: usize,
    pub planned: Vec<PlannedFetch>,
    pub watermark_before: Option<DateTime<Utc>>,
    pub watermark_after: Option<DateTime<Utc>>,
    pub failure: Option<TimestampFailure>,
}

impl LayerReport {
    pub fn new(layer: &str, watermark: Option<DateTime<Utc>>) -> Self {
        Self {
            layer: layer.to_string(),
            watermark_before: watermark,
            watermark_after: watermark,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub dry_run: bool,
    pub cancelled: bool,
    pub layers: Vec<LayerReport>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        self.layers.iter().any(|l| l.failure.is_some())
    }

    pub fn fetched(&self) -> usize {
        self.layers.iter().map(|l| l.fetched).sum()
    }

    pub fn failed(&self) -> usize {
        self.layers.iter().map(|l| l.failed).sum()
    }

    pub fn intended_fetches(&self) -> usize {
        self.layers.iter().map(|l| l.planned.len()).sum()
    }

    pub fn layer(&self, name: &str) -> Option<&LayerReport> {
        self.layers.iter().find(|l| l.layer == name)
    }
}

fn watermark(value: &Option<DateTime<Utc>>) -> String {
    value.as_ref().map_or_else(|| "-".to_string(), format_instant)
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.dry_run { " (dry run)" } else { "" };
        writeln!(f, "Sync summary{mode}:")?;
        for layer in &self.layers {
            write!(
                f,
                "  {}: {} pending, {} committed, fetched {}, skipped {}, failed {}",
                layer.layer,
                layer.pending_timestamps,
                layer.committed_timestamps,
                layer.fetched,
                layer.skipped,
                layer.failed,
            )?;
            if self.dry_run {
                write!(f, ", would fetch {}", layer.planned.len())?;
            }
            writeln!(
                f,
                " [{} -> {}]",
                watermark(&layer.watermark_before),
                watermark(&layer.watermark_after)
            )?;
            if let Some(failure) = &layer.failure {
                writeln!(
                    f,
                    "    stopped at {} {}: {}",
                    format_instant(&failure.timestamp),
                    failure.stage,
                    failure.error
                )?;
            }
        }
        if self.cancelled {
            writeln!(f, "  interrupted; progress up to the last committed timestamp is saved")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_summary_text() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap();
        let mut ok = LayerReport::new("prectype", None);
        ok.pending_timestamps = 1;
        ok.committed_timestamps = 1;
        ok.fetched = 4;
        ok.watermark_after = Some(t);
        let mut bad = LayerReport::new("reflectivity", Some(t));
        bad.pending_timestamps = 2;
        bad.failed = 1;
        bad.failure = Some(TimestampFailure {
            timestamp: t,
            stage: FailureStage::Fetch {
                tile_index: 2,
                attempts: 3,
            },
            error: "HTTP 503".to_string(),
        });
        let report = SyncReport {
            dry_run: false,
            cancelled: false,
            layers: vec![ok, bad],
        };

        assert!(report.has_failures());
        assert_eq!(report.fetched(), 4);
        assert_eq!(report.failed(), 1);
        let text = report.to_string();
        assert!(text.contains("prectype: 1 pending, 1 committed, fetched 4, skipped 0, failed 0 [- -> 2025-01-01T00:05:00Z]"));
        assert!(text.contains("stopped at 2025-01-01T00:05:00Z tile 2 after 3 attempt(s): HTTP 503"));
    }

    #[test]
    fn test_manifest_failure_names_no_tile() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap();
        let failure = TimestampFailure {
            timestamp: t,
            stage: FailureStage::Manifest,
            error: "disk full".to_string(),
        };
        assert_eq!(failure.tile_index(), None);
        let mut layer = LayerReport::new("prectype", None);
        layer.failure = Some(failure);
        let report = SyncReport {
            layers: vec![layer],
            ..SyncReport::default()
        };
        let text = report.to_string();
        assert!(text.contains("stopped at 2025-01-01T00:05:00Z writing the manifest: disk full"));
        assert!(!text.contains("tile 0"));
    }
}
