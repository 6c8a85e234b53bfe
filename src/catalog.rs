//! Layer catalog: the list of layers, their time steps and extents.
//!
//! The synchronizer only needs [`Catalog::list_layers`]. [`JsonCatalog`] reads
//! a catalog document whose `time` values use the WMS time-dimension syntax
//! (`t1,t2,...` lists and `start/end/period` intervals).

use crate::grid::Extent;
use crate::state::parse_instant;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Upper bound on instants produced by one interval expression.
const MAX_INTERVAL_STEPS: usize = 100_000;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed catalog {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("layer {layer}: {message}")]
    InvalidLayer { layer: String, message: String },

    #[error("layer {0} appears more than once")]
    DuplicateLayer(String),
}

/// One layer as advertised by the source. Immutable for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerCatalogEntry {
    pub name: String,
    pub title: String,
    pub crs: String,
    pub native_bbox: Option<Extent>,
    /// Ascending; may still contain duplicates.
    pub available_timestamps: Vec<DateTime<Utc>>,
}

pub trait Catalog {
    /// All layers, in catalog order. Any failure invalidates the whole list.
    fn list_layers(&self) -> Result<Vec<LayerCatalogEntry>, CatalogError>;
}

impl Catalog for Vec<LayerCatalogEntry> {
    fn list_layers(&self) -> Result<Vec<LayerCatalogEntry>, CatalogError> {
        check_unique(self)?;
        Ok(self.clone())
    }
}

fn check_unique(layers: &[LayerCatalogEntry]) -> Result<(), CatalogError> {
    let mut seen = HashSet::new();
    for layer in layers {
        if !seen.insert(layer.name.as_str()) {
            return Err(CatalogError::DuplicateLayer(layer.name.clone()));
        }
    }
    Ok(())
}

/// ISO-8601 duration limited to weeks, days, hours, minutes and seconds.
///
/// Calendar units (years, months) have no fixed length, and those or any
/// other unrecognised form yield `Ok(None)`. A well-formed period too large
/// to represent is an error.
pub fn parse_iso_duration(value: &str) -> Result<Option<Duration>, String> {
    let Some(rest) = value.trim().strip_prefix('P') else {
        return Ok(None);
    };
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };
    let out_of_range = || format!("period {value:?} is out of range");

    let mut total = Duration::zero();
    let mut any = false;
    for (part, in_time) in [(date_part, false), (time_part, true)] {
        let mut number = String::new();
        for c in part.chars() {
            if c.is_ascii_digit() {
                number.push(c);
                continue;
            }
            if number.is_empty() {
                return Ok(None);
            }
            let n: i64 = number.parse().map_err(|_| out_of_range())?;
            number.clear();
            let unit = match (c, in_time) {
                ('W', false) => Duration::try_weeks(n),
                ('D', false) => Duration::try_days(n),
                ('H', true) => Duration::try_hours(n),
                ('M', true) => Duration::try_minutes(n),
                ('S', true) => Duration::try_seconds(n),
                _ => return Ok(None),
            };
            total = unit
                .and_then(|unit| total.checked_add(&unit))
                .ok_or_else(out_of_range)?;
            any = true;
        }
        if !number.is_empty() {
            return Ok(None);
        }
    }
    Ok((any && total > Duration::zero()).then_some(total))
}

/// Expand a WMS time-dimension value into instants.
///
/// An interval whose period cannot be used expands to nothing; a malformed
/// instant or an out-of-range period is an error.
pub fn parse_time_dimension(value: &str) -> Result<Vec<DateTime<Utc>>, String> {
    let mut times = Vec::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parts: Vec<&str> = item.split('/').collect();
        match parts.as_slice() {
            [single] => times.push(instant(single)?),
            [start, end, period] => {
                let (start, end) = (instant(start)?, instant(end)?);
                let Some(step) = parse_iso_duration(period)? else {
                    debug!(period = %period, "skipping interval with unsupported period");
                    continue;
                };
                expand_interval(start, end, step, &mut times)?;
            }
            _ => return Err(format!("unsupported time value {item:?}")),
        }
    }
    Ok(times)
}

/// Push `start, start + step, ...` up to and including `end`.
fn expand_interval(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
    times: &mut Vec<DateTime<Utc>>,
) -> Result<(), String> {
    let mut current = start;
    while current <= end {
        if times.len() >= MAX_INTERVAL_STEPS {
            return Err(format!("interval from {start} expands to too many instants"));
        }
        times.push(current);
        // Stepping past the last representable instant is past `end` too.
        match current.checked_add_signed(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(())
}

fn instant(text: &str) -> Result<DateTime<Utc>, String> {
    parse_instant(text).ok_or_else(|| format!("invalid instant {text:?}"))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimeSpec {
    Dimension(String),
    List(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct LayerDoc {
    name: String,
    #[serde(default)]
    title: Option<String>,
    crs: String,
    #[serde(default)]
    bbox: Option<Extent>,
    #[serde(default)]
    time: Option<TimeSpec>,
}

#[derive(Debug, Deserialize)]
struct CatalogDoc {
    layers: Vec<LayerDoc>,
}

/// Catalog read from a JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonCatalog {
    path: PathBuf,
}

impl JsonCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(text: &str, path: &Path) -> Result<Vec<LayerCatalogEntry>, CatalogError> {
        let doc: CatalogDoc = serde_json::from_str(text).map_err(|e| CatalogError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut layers = Vec::with_capacity(doc.layers.len());
        for layer in doc.layers {
            let name = layer.name.trim().to_string();
            if name.is_empty() {
                return Err(CatalogError::Malformed {
                    path: path.to_path_buf(),
                    message: "layer with empty name".to_string(),
                });
            }
            let invalid = |message: String| CatalogError::InvalidLayer {
                layer: name.clone(),
                message,
            };
            let mut times = match &layer.time {
                None => Vec::new(),
                Some(TimeSpec::Dimension(value)) => parse_time_dimension(value).map_err(invalid)?,
                Some(TimeSpec::List(values)) => values
                    .iter()
                    .map(|v| instant(v))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(invalid)?,
            };
            if times.is_empty() {
                debug!(layer = %name, "no time dimension found");
            }
            times.sort();
            layers.push(LayerCatalogEntry {
                title: layer.title.unwrap_or_else(|| name.clone()),
                name,
                crs: layer.crs,
                native_bbox: layer.bbox,
                available_timestamps: times,
            });
        }
        check_unique(&layers)?;
        Ok(layers)
    }
}

impl Catalog for JsonCatalog {
    fn list_layers(&self) -> Result<Vec<LayerCatalogEntry>, CatalogError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| CatalogError::Read {
            path: self.path.clone(),
            source,
        })?;
        Self::parse(&text, &self.path)
    }
}
