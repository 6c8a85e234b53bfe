//! Tile configuration: loading, defaults, and validation.
//!
//! The document is JSON, or YAML when the file name ends in `.yaml`/`.yml`:
//!
//! ```json
//! {
//!   "tile_width": 512,
//!   "tile_height": 512,
//!   "resolution": 1000.0,
//!   "bboxes": [{"crs": "EPSG:3575", "minx": 0, "miny": 0, "maxx": 10, "maxy": 10}]
//! }
//! ```

use crate::grid::Extent;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_TILE_WIDTH: u32 = 512;
pub const DEFAULT_TILE_HEIGHT: u32 = 512;
pub const DEFAULT_CRS: &str = "EPSG:3575";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read tile config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse tile config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("tile size must be positive, got {width}x{height}")]
    InvalidTileSize { width: u32, height: u32 },

    #[error("resolution must be a positive number, got {0}")]
    InvalidResolution(f64),

    #[error("bbox #{index} is empty or inverted: ({minx}, {miny}, {maxx}, {maxy})")]
    DegenerateBbox {
        index: usize,
        minx: f64,
        miny: f64,
        maxx: f64,
        maxy: f64,
    },

    #[error("bbox #{index} uses {bbox_crs} but layer {layer} is served in {layer_crs}")]
    CrsMismatch {
        layer: String,
        layer_crs: String,
        bbox_crs: String,
        index: usize,
    },

    #[error("layer {layer} has no usable bbox and no fallback extent is known for {crs}")]
    NoExtent { layer: String, crs: String },

    #[error("resolution {resolution} splits layer {layer} into more than {max} tiles")]
    GridTooLarge {
        layer: String,
        resolution: f64,
        max: usize,
    },
}

/// One explicitly configured tile area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BboxConfig {
    #[serde(default = "default_crs")]
    pub crs: String,
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BboxConfig {
    pub fn extent(&self) -> Extent {
        Extent::new(self.minx, self.miny, self.maxx, self.maxy)
    }
}

fn default_crs() -> String {
    DEFAULT_CRS.to_string()
}

fn default_tile_width() -> u32 {
    DEFAULT_TILE_WIDTH
}

fn default_tile_height() -> u32 {
    DEFAULT_TILE_HEIGHT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileConfig {
    #[serde(default = "default_tile_width")]
    pub tile_width: u32,
    #[serde(default = "default_tile_height")]
    pub tile_height: u32,
    /// Map units per pixel; switches on grid partitioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<f64>,
    /// Explicit tile areas; take precedence over `resolution`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bboxes: Option<Vec<BboxConfig>>,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_WIDTH,
            tile_height: DEFAULT_TILE_HEIGHT,
            resolution: None,
            bboxes: None,
        }
    }
}

impl TileConfig {
    /// Check the invariants the grid math relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(ConfigError::InvalidTileSize {
                width: self.tile_width,
                height: self.tile_height,
            });
        }
        if let Some(resolution) = self.resolution {
            if !(resolution.is_finite() && resolution > 0.0) {
                return Err(ConfigError::InvalidResolution(resolution));
            }
        }
        for (index, bbox) in self.explicit_bboxes().iter().enumerate() {
            if !bbox.extent().is_valid() {
                return Err(ConfigError::DegenerateBbox {
                    index,
                    minx: bbox.minx,
                    miny: bbox.miny,
                    maxx: bbox.maxx,
                    maxy: bbox.maxy,
                });
            }
        }
        Ok(())
    }

    /// Explicit bboxes, treating an empty list like an absent one.
    pub fn explicit_bboxes(&self) -> &[BboxConfig] {
        self.bboxes.as_deref().unwrap_or_default()
    }
}

/// Determines the format of a tile config file based on extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ConfigFormat::Yaml
            }
            _ => ConfigFormat::Json,
        }
    }
}

/// Parse and validate a tile config document.
pub fn parse_tile_config(text: &str, format: ConfigFormat, path: &Path) -> Result<TileConfig, ConfigError> {
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let config: TileConfig = match format {
        ConfigFormat::Json => serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))?,
        ConfigFormat::Yaml => serde_yml::from_str(text).map_err(|e| parse_err(e.to_string()))?,
    };
    config.validate()?;
    Ok(config)
}

/// Load the tile config at `path`, or the defaults when no path is given.
pub fn load_tile_config(path: Option<&Path>) -> Result<TileConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(TileConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_tile_config(&text, ConfigFormat::from_path(path), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_path_gives_defaults() {
        let config = load_tile_config(None).unwrap();
        assert_eq!(config, TileConfig::default());
        assert_eq!(config.tile_width, 512);
        assert!(config.explicit_bboxes().is_empty());
    }

    #[test]
    fn test_json_config_with_bboxes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tiles.json");
        std::fs::write(
            &path,
            r#"{"tile_width": 256, "bboxes": [
                {"minx": 0, "miny": 0, "maxx": 10, "maxy": 10},
                {"crs": "EPSG:4326", "minx": 5, "miny": 50, "maxx": 15, "maxy": 58}
            ]}"#,
        )
        .unwrap();

        let config = load_tile_config(Some(&path)).unwrap();
        assert_eq!(config.tile_width, 256);
        assert_eq!(config.tile_height, DEFAULT_TILE_HEIGHT);
        let bboxes = config.explicit_bboxes();
        assert_eq!(bboxes.len(), 2);
        assert_eq!(bboxes[0].crs, DEFAULT_CRS);
        assert_eq!(bboxes[1].crs, "EPSG:4326");
    }

    #[test]
    fn test_yaml_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tiles.yml");
        std::fs::write(&path, "tile_width: 1024\ntile_height: 768\nresolution: 250.0\n").unwrap();

        let config = load_tile_config(Some(&path)).unwrap();
        assert_eq!(config.tile_width, 1024);
        assert_eq!(config.tile_height, 768);
        assert_eq!(config.resolution, Some(250.0));
    }

    #[test]
    fn test_rejects_zero_tile_size() {
        let config = TileConfig {
            tile_width: 0,
            ..TileConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTileSize { .. })));
    }

    #[test]
    fn test_rejects_non_positive_resolution() {
        let config = TileConfig {
            resolution: Some(-1.0),
            ..TileConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidResolution(_))));
    }

    #[test]
    fn test_rejects_inverted_bbox() {
        let text = r#"{"bboxes": [{"minx": 10, "miny": 0, "maxx": 0, "maxy": 10}]}"#;
        let result = parse_tile_config(text, ConfigFormat::Json, Path::new("tiles.json"));
        assert!(matches!(result, Err(ConfigError::DegenerateBbox { index: 0, .. })));
    }

    #[test]
    fn test_malformed_document() {
        let result = parse_tile_config("{", ConfigFormat::Json, Path::new("tiles.json"));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.YAML")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("tiles")), ConfigFormat::Json);
    }
}
