//! Run-level errors. Any of these aborts the whole run; per-tile and
//! per-timestamp problems are reported in the `SyncReport` instead.

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid tile configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("layer catalog unavailable: {0}")]
    Catalog(#[from] CatalogError),

    /// Never repaired automatically; the file is left as found.
    #[error("state file {path} is corrupt and must be fixed by hand: {source}")]
    StateCorrupt {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("cannot persist sync state: {0}")]
    Store(#[source] StoreError),
}

impl SyncError {
    /// Classify a failure to read the state file.
    pub fn from_state_load(path: PathBuf, error: StoreError) -> Self {
        match error {
            StoreError::Parse { .. } => SyncError::StateCorrupt {
                path,
                source: error,
            },
            other => SyncError::Store(other),
        }
    }
}
