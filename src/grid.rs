//! Tile grid calculation.
//!
//! Turns a layer's extent and a [`TileConfig`] into the ordered list of tiles
//! to request. The order is part of the on-disk contract: `tile_index` feeds
//! the file name of every stored tile.

use crate::config::{ConfigError, TileConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Most tiles a resolution grid may produce for one layer.
pub const MAX_GRID_TILES: usize = 1_000_000;

/// Axis-aligned rectangle in the map units of some CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl Extent {
    pub const fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self {
            minx,
            miny,
            maxx,
            maxy,
        }
    }

    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// Finite with a positive area.
    pub fn is_valid(&self) -> bool {
        [self.minx, self.miny, self.maxx, self.maxy]
            .iter()
            .all(|v| v.is_finite())
            && self.minx < self.maxx
            && self.miny < self.maxy
    }

    pub fn contains(&self, inner: &Extent) -> bool {
        self.minx <= inner.minx
            && self.miny <= inner.miny
            && self.maxx >= inner.maxx
            && self.maxy >= inner.maxy
    }
}

/// Per-CRS default extents.
///
/// An entry is used when a layer has no usable bbox of its own, and also
/// narrows a layer whose bbox fully contains it to that area of interest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extents {
    by_crs: BTreeMap<String, Extent>,
}

impl Extents {
    /// No fallbacks at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, crs: &str, extent: Extent) -> Self {
        self.by_crs.insert(crs.to_ascii_uppercase(), extent);
        self
    }

    pub fn get(&self, crs: &str) -> Option<Extent> {
        self.by_crs.get(&crs.to_ascii_uppercase()).copied()
    }

    /// Built-in table: the Danish radar composite area in EPSG:3575.
    pub fn builtin() -> Self {
        Self::empty().with(
            "EPSG:3575",
            Extent::new(-132072.7784, -3912803.2510, 360255.4228, -3547098.2575),
        )
    }
}

/// One tile to fetch for a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDescriptor {
    pub layer_name: String,
    pub tile_index: usize,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub bbox: Extent,
    pub crs: String,
}

fn same_crs(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// The area a layer's tiles are cut from, if one can be determined.
pub fn effective_extent(layer_bbox: Option<Extent>, crs: &str, extents: &Extents) -> Option<Extent> {
    let fallback = extents.get(crs);
    match layer_bbox.filter(Extent::is_valid) {
        None => fallback,
        Some(bbox) => match fallback {
            Some(area) if bbox.contains(&area) => Some(area),
            _ => Some(bbox),
        },
    }
}

/// Number of `step`-sized cells needed to cover `span`, at least one.
/// `None` past [`MAX_GRID_TILES`].
fn cell_count(span: f64, step: f64) -> Option<usize> {
    // Tolerate float noise so 1024/512 stays 2 rather than 3.
    let cells = (span / step - 1e-9).ceil();
    if cells < 1.0 {
        Some(1)
    } else if cells <= MAX_GRID_TILES as f64 {
        Some(cells as usize)
    } else {
        None
    }
}

fn clipped_pixels(span: f64, resolution: f64, full: u32) -> u32 {
    let px = (span / resolution).round();
    px.clamp(1.0, full as f64) as u32
}

/// Compute the ordered tile grid for one layer.
///
/// - explicit bboxes: one tile each, in listed order;
/// - resolution: row-major grid over the effective extent, row 0 at the top
///   (max y), edge tiles clipped to the extent;
/// - otherwise: one tile covering the effective extent.
pub fn compute_grid(
    layer_name: &str,
    layer_bbox: Option<Extent>,
    crs: &str,
    config: &TileConfig,
    extents: &Extents,
) -> Result<Vec<TileDescriptor>, ConfigError> {
    config.validate()?;

    let explicit = config.explicit_bboxes();
    if !explicit.is_empty() {
        return explicit
            .iter()
            .enumerate()
            .map(|(index, bbox)| {
                if !same_crs(&bbox.crs, crs) {
                    return Err(ConfigError::CrsMismatch {
                        layer: layer_name.to_string(),
                        layer_crs: crs.to_string(),
                        bbox_crs: bbox.crs.clone(),
                        index,
                    });
                }
                Ok(TileDescriptor {
                    layer_name: layer_name.to_string(),
                    tile_index: index,
                    pixel_width: config.tile_width,
                    pixel_height: config.tile_height,
                    bbox: bbox.extent(),
                    crs: bbox.crs.clone(),
                })
            })
            .collect();
    }

    let extent = effective_extent(layer_bbox, crs, extents).ok_or_else(|| ConfigError::NoExtent {
        layer: layer_name.to_string(),
        crs: crs.to_string(),
    })?;

    let Some(resolution) = config.resolution else {
        return Ok(vec![TileDescriptor {
            layer_name: layer_name.to_string(),
            tile_index: 0,
            pixel_width: config.tile_width,
            pixel_height: config.tile_height,
            bbox: extent,
            crs: crs.to_string(),
        }]);
    };

    let step_x = config.tile_width as f64 * resolution;
    let step_y = config.tile_height as f64 * resolution;
    let too_large = || ConfigError::GridTooLarge {
        layer: layer_name.to_string(),
        resolution,
        max: MAX_GRID_TILES,
    };
    let cols = cell_count(extent.width(), step_x).ok_or_else(too_large)?;
    let rows = cell_count(extent.height(), step_y).ok_or_else(too_large)?;
    if rows.checked_mul(cols).map_or(true, |n| n > MAX_GRID_TILES) {
        return Err(too_large());
    }

    let mut tiles = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        let maxy = extent.maxy - row as f64 * step_y;
        let miny = (maxy - step_y).max(extent.miny);
        for col in 0..cols {
            let minx = extent.minx + col as f64 * step_x;
            let maxx = (minx + step_x).min(extent.maxx);
            let bbox = Extent::new(minx, miny, maxx, maxy);
            tiles.push(TileDescriptor {
                layer_name: layer_name.to_string(),
                tile_index: tiles.len(),
                pixel_width: clipped_pixels(bbox.width(), resolution, config.tile_width),
                pixel_height: clipped_pixels(bbox.height(), resolution, config.tile_height),
                bbox,
                crs: crs.to_string(),
            });
        }
    }
    Ok(tiles)
}
