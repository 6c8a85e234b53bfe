//! Incremental tile synchronization.
//!
//! For every layer, in catalog order:
//! - pick the timestamps newer than the layer's watermark (and inside the
//!   retention window), oldest first;
//! - fetch every tile of a timestamp, skipping tiles already on disk;
//! - once all tiles of a timestamp are stored, write its manifest and commit
//!   the watermark before moving on.
//!
//! A timestamp with a failed tile is never committed. The layer stops there
//! and the run continues with the next layer.
//!
//! Layers share nothing but the state file, whose commits are merged under a
//! lock, so they can be synchronized independently.

mod fetch;
mod hash;
mod manifest;
mod report;
mod select;
mod wms;

pub use fetch::{
    fetch_with_retry, CancelToken, FetchError, FetchErrorKind, FetchFailure, RetryPolicy, TileFetcher,
    TileRequest,
};
pub use hash::TileDigest;
pub use manifest::{ManifestTile, TimestampManifest};
pub use report::{FailureStage, LayerReport, PlannedFetch, SyncReport, TimestampFailure};
pub use select::select_pending;
pub use wms::{build_getmap_url, WmsFetcher};

use crate::catalog::{Catalog, LayerCatalogEntry};
use crate::config::TileConfig;
use crate::error::SyncError;
use crate::grid::{compute_grid, Extents, TileDescriptor};
use crate::layout::{tile_file_name, Layout};
use crate::state::{format_instant, SyncState, StateStore};
use crate::store;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub output_dir: PathBuf,
    pub dry_run: bool,
    /// Ignore timestamps older than this.
    pub max_age: Option<Duration>,
    /// Reference time for `max_age`; the wall clock when unset.
    pub now: Option<DateTime<Utc>>,
    pub retry: RetryPolicy,
    pub extents: Extents,
}

impl SyncOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            dry_run: false,
            max_age: None,
            now: None,
            retry: RetryPolicy::default(),
            extents: Extents::builtin(),
        }
    }
}

/// Work planned for one layer before any fetching starts.
struct LayerPlan<'a> {
    entry: &'a LayerCatalogEntry,
    pending: Vec<DateTime<Utc>>,
    tiles: Vec<TileDescriptor>,
}

enum Flow {
    Continue,
    Cancelled,
}

enum TimestampOutcome {
    Complete(Vec<ManifestTile>),
    Failed(TimestampFailure),
    Cancelled,
}

pub struct Synchronizer {
    fetcher: Arc<dyn TileFetcher>,
    store: StateStore,
    layout: Layout,
    options: SyncOptions,
    cancel: CancelToken,
}

impl Synchronizer {
    pub fn new(fetcher: Arc<dyn TileFetcher>, store: StateStore, options: SyncOptions) -> Self {
        Self {
            fetcher,
            store,
            layout: Layout::new(options.output_dir.clone()),
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Load state, list the catalog and synchronize it.
    pub fn run(
        &self,
        catalog: &dyn Catalog,
        config: &TileConfig,
    ) -> Result<(SyncState, SyncReport), SyncError> {
        let state = self
            .store
            .load()
            .map_err(|e| SyncError::from_state_load(self.store.path().to_path_buf(), e))?;
        let layers = catalog.list_layers()?;
        info!(layers = layers.len(), state = %self.store.path().display(), "catalog loaded");
        self.sync(&layers, config, state)
    }

    /// Synchronize `catalog` starting from `state`, returning the advanced
    /// state and the run report.
    ///
    /// Configuration problems are detected for every layer before the first
    /// fetch.
    pub fn sync(
        &self,
        catalog: &[LayerCatalogEntry],
        config: &TileConfig,
        mut state: SyncState,
    ) -> Result<(SyncState, SyncReport), SyncError> {
        config.validate()?;
        let now = self.options.now.unwrap_or_else(Utc::now);

        let mut plans = Vec::with_capacity(catalog.len());
        for entry in catalog {
            let pending = select_pending(
                &entry.available_timestamps,
                state.get(&entry.name),
                self.options.max_age,
                now,
            );
            let tiles = if pending.is_empty() {
                Vec::new()
            } else {
                compute_grid(&entry.name, entry.native_bbox, &entry.crs, config, &self.options.extents)?
            };
            plans.push(LayerPlan {
                entry,
                pending,
                tiles,
            });
        }

        let mut report = SyncReport {
            dry_run: self.options.dry_run,
            ..SyncReport::default()
        };
        for plan in &plans {
            let mut layer_report = LayerReport::new(&plan.entry.name, state.get(&plan.entry.name));
            layer_report.pending_timestamps = plan.pending.len();
            let flow = if self.cancel.is_cancelled() {
                Flow::Cancelled
            } else {
                self.sync_layer(plan, &mut state, &mut layer_report)?
            };
            info!(
                layer = %plan.entry.name,
                pending = layer_report.pending_timestamps,
                committed = layer_report.committed_timestamps,
                fetched = layer_report.fetched,
                skipped = layer_report.skipped,
                failed = layer_report.failed,
                "layer done"
            );
            report.layers.push(layer_report);
            if let Flow::Cancelled = flow {
                warn!("sync interrupted");
                report.cancelled = true;
                break;
            }
        }
        Ok((state, report))
    }

    fn sync_layer(
        &self,
        plan: &LayerPlan<'_>,
        state: &mut SyncState,
        report: &mut LayerReport,
    ) -> Result<Flow, SyncError> {
        let layer = plan.entry.name.as_str();
        for timestamp in &plan.pending {
            match self.sync_timestamp(plan, *timestamp, report) {
                TimestampOutcome::Cancelled => return Ok(Flow::Cancelled),
                TimestampOutcome::Failed(failure) => {
                    warn!(
                        layer,
                        timestamp = %format_instant(&failure.timestamp),
                        stage = %failure.stage,
                        error = %failure.error,
                        "timestamp abandoned"
                    );
                    report.failure = Some(failure);
                    return Ok(Flow::Continue);
                }
                TimestampOutcome::Complete(_) if self.options.dry_run => {}
                TimestampOutcome::Complete(tiles) => {
                    let manifest = TimestampManifest::new(layer, timestamp, tiles);
                    let manifest_path = self.layout.manifest_path(layer, timestamp);
                    if let Err(e) = manifest.write(&manifest_path) {
                        warn!(layer, timestamp = %format_instant(timestamp), error = %e, "manifest write failed");
                        report.failure = Some(TimestampFailure {
                            timestamp: *timestamp,
                            stage: FailureStage::Manifest,
                            error: e.to_string(),
                        });
                        return Ok(Flow::Continue);
                    }

                    state.advance(layer, *timestamp);
                    let on_disk = self.store.commit(state).map_err(SyncError::Store)?;
                    state.merge(&on_disk);
                    report.committed_timestamps += 1;
                    report.watermark_after = state.get(layer);
                    debug!(layer, timestamp = %format_instant(timestamp), "watermark committed");
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn sync_timestamp(
        &self,
        plan: &LayerPlan<'_>,
        timestamp: DateTime<Utc>,
        report: &mut LayerReport,
    ) -> TimestampOutcome {
        let mut done = Vec::with_capacity(plan.tiles.len());
        for tile in &plan.tiles {
            let path = self.layout.tile_path(&timestamp, tile);
            let file = tile_file_name(tile);
            let failure = |stage: FailureStage, error: String| TimestampFailure {
                timestamp,
                stage,
                error,
            };
            let stored = FailureStage::Store {
                tile_index: tile.tile_index,
            };

            if path.exists() {
                report.skipped += 1;
                if !self.options.dry_run {
                    match TileDigest::of_file(&path) {
                        Ok((digest, bytes)) => done.push(ManifestTile::new(tile, file, bytes, digest)),
                        Err(e) => {
                            report.failed += 1;
                            return TimestampOutcome::Failed(failure(stored, format!("{}: {e}", path.display())));
                        }
                    }
                }
                continue;
            }

            let request = TileRequest::for_tile(tile, timestamp);
            if self.options.dry_run {
                let url = self.fetcher.describe(&request);
                info!(url = url.as_deref().unwrap_or("-"), path = %path.display(), "would fetch");
                report.planned.push(PlannedFetch {
                    timestamp,
                    tile_index: tile.tile_index,
                    path,
                    url,
                });
                continue;
            }

            let bytes = match fetch_with_retry(self.fetcher.as_ref(), &request, &self.options.retry, &self.cancel) {
                Ok(bytes) => bytes,
                Err(FetchFailure::Cancelled) => return TimestampOutcome::Cancelled,
                Err(FetchFailure::Failed { error, attempts }) => {
                    report.failed += 1;
                    let stage = FailureStage::Fetch {
                        tile_index: tile.tile_index,
                        attempts,
                    };
                    return TimestampOutcome::Failed(failure(stage, error.to_string()));
                }
            };
            if let Err(e) = store::write_bytes_atomic(&path, &bytes) {
                report.failed += 1;
                return TimestampOutcome::Failed(failure(stored, e.to_string()));
            }
            debug!(layer = %tile.layer_name, tile = tile.tile_index, bytes = bytes.len(), "tile stored");
            report.fetched += 1;
            done.push(ManifestTile::new(tile, file, bytes.len() as u64, TileDigest::of(&bytes)));
        }
        TimestampOutcome::Complete(done)
    }
}
