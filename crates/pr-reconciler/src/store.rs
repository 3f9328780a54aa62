//! Durable per-item remediation history.
//!
//! The store is a versioned JSON document rewritten wholesale (temp file +
//! rename) whenever a cycle mutated it. It is a cache over state that can be
//! re-derived from the host, so an unreadable file is discarded rather than
//! treated as fatal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write as _};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::fingerprint::Fingerprint;
use crate::types::ItemKey;

/// Current on-disk schema version.
pub const STATE_VERSION: u32 = 1;

/// Accumulated remediation history for one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedState {
    pub item_key: ItemKey,
    /// Fingerprint at the moment conflict resolution last succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_conflict_fingerprint: Option<Fingerprint>,
    /// Fingerprint at the moment review resolution last succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_fingerprint: Option<Fingerprint>,
    /// Waterline: highest comment id known to be addressed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_addressed_comment_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Set once, the first time the item was observed merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_as_merged_at: Option<DateTime<Utc>>,
}

impl ProcessedState {
    #[must_use]
    pub fn new(item_key: ItemKey) -> Self {
        Self {
            item_key,
            last_conflict_fingerprint: None,
            last_review_fingerprint: None,
            last_addressed_comment_id: None,
            last_processed_at: None,
            seen_as_merged_at: None,
        }
    }
}

/// Root persisted aggregate, owned by the reconciler for the length of a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateStore {
    version: u32,
    #[serde(default)]
    items: BTreeMap<ItemKey, ProcessedState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    dirty: bool,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            items: BTreeMap::new(),
            last_updated_at: None,
            dirty: false,
        }
    }

    /// Load the store from `path`.
    ///
    /// A missing, unreadable, unparsable, or newer-versioned file yields an
    /// empty store; the next successful save replaces it.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No state file found, starting empty");
                return Self::new();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "State file unreadable, starting empty");
                return Self::new();
            }
        };

        let mut store: Self = match serde_json::from_str(&content) {
            Ok(store) => store,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "State file corrupt, starting empty");
                return Self::new();
            }
        };

        if store.version > STATE_VERSION {
            warn!(
                path = %path.display(),
                found = store.version,
                supported = STATE_VERSION,
                "State file written by a newer version, starting empty"
            );
            return Self::new();
        }

        // The map key is authoritative.
        for (key, state) in &mut store.items {
            if state.item_key != *key {
                debug!(item = %key, stored = %state.item_key, "Correcting mismatched item key");
                state.item_key = key.clone();
            }
        }

        store.version = STATE_VERSION;
        store.dirty = false;
        info!(
            path = %path.display(),
            items = store.items.len(),
            "Loaded state file"
        );
        store
    }

    /// Rewrite the whole store to `path` atomically and clear the dirty flag.
    pub fn save(&mut self, path: &Path) -> Result<(), StoreError> {
        let previous = self.last_updated_at.replace(Utc::now());

        let result = serde_json::to_string_pretty(self)
            .map_err(StoreError::from)
            .and_then(|content| {
                write_atomically(path, &content).map_err(|source| StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            });

        match result {
            Ok(()) => {
                self.dirty = false;
                debug!(path = %path.display(), items = self.items.len(), "Persisted state");
                Ok(())
            }
            Err(e) => {
                self.last_updated_at = previous;
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &ItemKey) -> Option<&ProcessedState> {
        self.items.get(key)
    }

    /// Return the item's state, creating it on first observation.
    pub fn observe(&mut self, key: &ItemKey) -> &ProcessedState {
        if !self.items.contains_key(key) {
            debug!(item = %key, "Tracking new item");
            self.dirty = true;
        }
        self.items
            .entry(key.clone())
            .or_insert_with(|| ProcessedState::new(key.clone()))
    }

    /// Record a successful conflict resolution.
    pub fn record_conflicts_resolved(
        &mut self,
        key: &ItemKey,
        fingerprint: Fingerprint,
        now: DateTime<Utc>,
    ) {
        let state = self.entry(key);
        state.last_conflict_fingerprint = Some(fingerprint);
        state.last_processed_at = Some(now);
    }

    /// Record a successful review resolution covering comments up to `addressed_up_to`.
    ///
    /// The waterline never moves backwards.
    pub fn record_reviews_addressed(
        &mut self,
        key: &ItemKey,
        fingerprint: Fingerprint,
        addressed_up_to: u64,
        now: DateTime<Utc>,
    ) {
        let state = self.entry(key);
        state.last_review_fingerprint = Some(fingerprint);
        state.last_addressed_comment_id = Some(
            state
                .last_addressed_comment_id
                .map_or(addressed_up_to, |current| current.max(addressed_up_to)),
        );
        state.last_processed_at = Some(now);
    }

    /// Mark the item as seen merged. Only the first call has an effect.
    ///
    /// Returns `true` if this call set the timestamp.
    pub fn record_merged(&mut self, key: &ItemKey, now: DateTime<Utc>) -> bool {
        if self
            .items
            .get(key)
            .is_some_and(|s| s.seen_as_merged_at.is_some())
        {
            return false;
        }
        self.entry(key).seen_as_merged_at = Some(now);
        true
    }

    /// Keys of tracked items not yet confirmed merged.
    #[must_use]
    pub fn unmerged_keys(&self) -> Vec<ItemKey> {
        self.items
            .values()
            .filter(|s| s.seen_as_merged_at.is_none())
            .map(|s| s.item_key.clone())
            .collect()
    }

    pub fn items(&self) -> impl Iterator<Item = &ProcessedState> {
        self.items.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Whether the store changed since the last successful save.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.last_updated_at
    }

    fn entry(&mut self, key: &ItemKey) -> &mut ProcessedState {
        self.dirty = true;
        self.items
            .entry(key.clone())
            .or_insert_with(|| ProcessedState::new(key.clone()))
    }
}

/// Write `contents` to a temp file beside `path`, fsync it, then rename over `path`.
fn write_atomically(path: &Path, contents: &str) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
