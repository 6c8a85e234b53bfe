//! Per-timestamp manifest consumed by the daily stacker.

use super::hash::TileDigest;
use crate::grid::{Extent, TileDescriptor};
use crate::state::format_instant;
use crate::store::{self, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestTile {
    pub index: usize,
    pub file: String,
    pub crs: String,
    pub bbox: Extent,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
    pub blake3: TileDigest,
}

impl ManifestTile {
    pub fn new(tile: &TileDescriptor, file: String, bytes: u64, blake3: TileDigest) -> Self {
        Self {
            index: tile.tile_index,
            file,
            crs: tile.crs.clone(),
            bbox: tile.bbox,
            width: tile.pixel_width,
            height: tile.pixel_height,
            bytes,
            blake3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimestampManifest {
    pub layer: String,
    pub timestamp: String,
    pub tiles: Vec<ManifestTile>,
}

impl TimestampManifest {
    pub fn new(layer: &str, timestamp: &DateTime<Utc>, tiles: Vec<ManifestTile>) -> Self {
        Self {
            layer: layer.to_string(),
            timestamp: format_instant(timestamp),
            tiles,
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), StoreError> {
        store::write_atomic(path, self)
    }

    pub fn read(path: &Path) -> Result<Self, StoreError> {
        store::read(path)
    }
}
