//! `radar_sync` — incremental mirror of a time-dimensioned WMS raster source.
//!
//! Provides:
//! - `catalog` — Layer catalog seam and a JSON catalog with WMS time parsing
//! - `config` — Tile configuration loading and validation
//! - `grid` — Tile grid calculation per layer
//! - `state` — Per-layer watermarks and their locked, atomic store
//! - `sync` — The synchronizer: timestamp selection, fetching, committing
//! - `layout` — Deterministic on-disk paths for tiles and manifests

use std::path::PathBuf;

pub mod catalog;
pub mod config;
pub mod error;
pub mod grid;
pub mod layout;
pub mod lock;
pub mod logging;
pub mod state;
pub mod store;
pub mod sync;

pub use catalog::{Catalog, CatalogError, JsonCatalog, LayerCatalogEntry};
pub use config::{load_tile_config, ConfigError, TileConfig};
pub use error::SyncError;
pub use grid::{compute_grid, Extent, Extents, TileDescriptor};
pub use state::{StateStore, SyncState};
pub use sync::{SyncOptions, SyncReport, Synchronizer};

/// Default output directory name.
const DATA_DIR_NAME: &str = "data";

/// Environment variable to override the output directory.
const DATA_DIR_ENV: &str = "RADAR_SYNC_DATA_DIR";

/// Output directory used when none is given on the command line.
/// Respects `RADAR_SYNC_DATA_DIR`, otherwise `./data`.
pub fn default_output_dir() -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DATA_DIR_NAME),
    }
}
