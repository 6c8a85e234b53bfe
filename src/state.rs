//! Per-layer synchronization watermarks and their durable store.
//!
//! On disk the state is a flat JSON object mapping layer name to the last
//! fully synchronized instant, e.g. `{"prectype": "2025-01-01T00:00:00Z"}`.

use crate::lock::{self, LockOptions};
use crate::store::{self, StoreError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Watermark text format (always UTC, second precision).
pub const WATERMARK_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Parse an instant: RFC 3339 with any offset, or a naive value taken as UTC.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    let value = value.trim_end_matches(['Z', 'z']);
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_instant(value: &DateTime<Utc>) -> String {
    value.format(WATERMARK_FORMAT).to_string()
}

/// Layer name → last synchronized instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    last_times: BTreeMap<String, DateTime<Utc>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, layer: &str) -> Option<DateTime<Utc>> {
        self.last_times.get(layer).copied()
    }

    /// Move the watermark for `layer` forward to `instant`.
    ///
    /// Returns `false` (and changes nothing) when `instant` is not later than
    /// the current watermark.
    pub fn advance(&mut self, layer: &str, instant: DateTime<Utc>) -> bool {
        match self.last_times.get(layer) {
            Some(current) if instant <= *current => false,
            _ => {
                self.last_times.insert(layer.to_string(), instant);
                true
            }
        }
    }

    /// Advance every layer of `self` to at least the watermark in `other`.
    pub fn merge(&mut self, other: &SyncState) {
        for (layer, instant) in &other.last_times {
            self.advance(layer, *instant);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.last_times.is_empty()
    }
}

impl Serialize for SyncState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text: BTreeMap<&str, String> = self
            .last_times
            .iter()
            .map(|(layer, t)| (layer.as_str(), format_instant(t)))
            .collect();
        text.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SyncState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = BTreeMap::<String, String>::deserialize(deserializer)?;
        let mut last_times = BTreeMap::new();
        for (layer, value) in text {
            let instant = parse_instant(&value).ok_or_else(|| {
                serde::de::Error::custom(format!("invalid watermark {value:?} for layer {layer:?}"))
            })?;
            last_times.insert(layer, instant);
        }
        Ok(Self { last_times })
    }
}

/// The state file plus the lock that serializes commits to it.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_options: LockOptions,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lock::lock_path_for(&path);
        Self {
            path,
            lock_path,
            lock_options: LockOptions::default(),
        }
    }

    pub fn with_lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = options;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state. A missing file is an empty state; unparsable content
    /// is [`StoreError::Parse`], which callers must treat as corruption.
    pub fn load(&self) -> Result<SyncState, StoreError> {
        store::read(&self.path)
    }

    /// Durably merge `state` into the file and return what is now on disk.
    ///
    /// The file is re-read under the lock and each layer keeps the later of
    /// the two watermarks, so a concurrent run's progress is never undone.
    pub fn commit(&self, state: &SyncState) -> Result<SyncState, StoreError> {
        store::update(&self.path, &self.lock_path, self.lock_options, |on_disk: &mut SyncState| {
            on_disk.merge(state);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_advance_only_moves_forward() {
        let mut state = SyncState::new();
        assert!(state.advance("prectype", at(5)));
        assert!(!state.advance("prectype", at(5)));
        assert!(!state.advance("prectype", at(3)));
        assert_eq!(state.get("prectype"), Some(at(5)));
        assert!(state.advance("prectype", at(6)));
        assert_eq!(state.get("prectype"), Some(at(6)));
        assert_eq!(state.get("other"), None);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_commit_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        let mut state = SyncState::new();
        state.advance("prectype", at(0));

        store.commit(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\"prectype\": \"2025-01-01T00:00:00Z\""));
    }

    #[test]
    fn test_commit_never_regresses_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));

        let mut ahead = SyncState::new();
        ahead.advance("prectype", at(9));
        ahead.advance("reflectivity", at(1));
        store.commit(&ahead).unwrap();

        // A slower concurrent run holding an older view.
        let mut stale = SyncState::new();
        stale.advance("prectype", at(4));
        stale.advance("reflectivity", at(2));
        let merged = store.commit(&stale).unwrap();

        assert_eq!(merged.get("prectype"), Some(at(9)));
        assert_eq!(merged.get("reflectivity"), Some(at(2)));
        assert_eq!(store.load().unwrap(), merged);
    }

    #[test]
    fn test_commit_fails_while_lock_is_held() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");
        let store = StateStore::new(&path).with_lock_options(LockOptions {
            max_retries: 1,
            retry_delay: std::time::Duration::from_millis(5),
        });
        let _held = lock::acquire(&lock::lock_path_for(&path), LockOptions::default()).unwrap();

        let mut state = SyncState::new();
        state.advance("prectype", at(1));
        assert!(matches!(store.commit(&state), Err(StoreError::Lock { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn test_unparsable_state_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, r#"{"prectype": "yesterday"}"#).unwrap();
        let store = StateStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Parse { .. })));
        // Left untouched for a human to inspect.
        assert!(std::fs::read_to_string(&path).unwrap().contains("yesterday"));
    }

    #[test]
    fn test_parse_instant_variants() {
        assert_eq!(parse_instant("2025-01-01T05:00:00Z"), Some(at(5)));
        assert_eq!(parse_instant("2025-01-01T06:00:00+01:00"), Some(at(5)));
        assert_eq!(parse_instant("2025-01-01T05:00:00"), Some(at(5)));
        assert_eq!(parse_instant("2025-01-01T05:00"), Some(at(5)));
        assert_eq!(parse_instant("2025-01-01T05:00Z"), Some(at(5)));
        assert_eq!(parse_instant("soon"), None);
    }
}
