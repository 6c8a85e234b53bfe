//! On-disk layout of mirrored tiles.
//!
//! ```text
//! <root>/<layer>/<YYYYMMDDTHHMMSSZ>/tile_<index>_<minx>_<miny>_<maxx>_<maxy>.png
//! <root>/<layer>/<YYYYMMDDTHHMMSSZ>/manifest.json
//! <root>/state.json                      (default state file)
//! ```
//!
//! Downstream tools locate tiles by these names, so they must stay stable.

use crate::grid::TileDescriptor;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

pub const TIME_DIR_FORMAT: &str = "%Y%m%dT%H%M%SZ";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// State file used when none is configured explicitly.
    pub fn default_state_file(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    pub fn layer_dir(&self, layer: &str) -> PathBuf {
        self.root.join(dir_name(layer))
    }

    pub fn time_dir(&self, layer: &str, timestamp: &DateTime<Utc>) -> PathBuf {
        self.layer_dir(layer)
            .join(timestamp.format(TIME_DIR_FORMAT).to_string())
    }

    pub fn tile_path(&self, timestamp: &DateTime<Utc>, tile: &TileDescriptor) -> PathBuf {
        self.time_dir(&tile.layer_name, timestamp)
            .join(tile_file_name(tile))
    }

    pub fn manifest_path(&self, layer: &str, timestamp: &DateTime<Utc>) -> PathBuf {
        self.time_dir(layer, timestamp).join(MANIFEST_FILE)
    }
}

/// Layer names become a single path component.
fn dir_name(layer: &str) -> String {
    layer
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}

pub fn tile_file_name(tile: &TileDescriptor) -> String {
    let b = &tile.bbox;
    format!(
        "tile_{}_{}_{}_{}_{}.png",
        tile.tile_index, b.minx, b.miny, b.maxx, b.maxy
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Extent;
    use chrono::TimeZone;

    fn tile(index: usize) -> TileDescriptor {
        TileDescriptor {
            layer_name: "prectype".to_string(),
            tile_index: index,
            pixel_width: 512,
            pixel_height: 512,
            bbox: Extent::new(-1.5, 0.0, 10.0, 20.25),
            crs: "EPSG:3575".to_string(),
        }
    }

    #[test]
    fn test_tile_path() {
        let layout = Layout::new("/data");
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 12, 5, 0).unwrap();
        assert_eq!(
            layout.tile_path(&ts, &tile(3)),
            PathBuf::from("/data/prectype/20250101T120500Z/tile_3_-1.5_0_10_20.25.png")
        );
        assert_eq!(
            layout.manifest_path("prectype", &ts),
            PathBuf::from("/data/prectype/20250101T120500Z/manifest.json")
        );
    }

    #[test]
    fn test_layer_name_is_single_component() {
        let layout = Layout::new("/data");
        assert_eq!(layout.layer_dir("radar/dk:hi"), PathBuf::from("/data/radar_dk_hi"));
    }

    #[test]
    fn test_default_state_file() {
        assert_eq!(
            Layout::new("out").default_state_file(),
            PathBuf::from("out/state.json")
        );
    }
}
