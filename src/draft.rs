//! Draft snapshot persistence
//!
//! Answers and candidate details are written to a durable key-value store while
//! the assessment is active, under a key derived from the assessment kind so
//! two kinds never collide. A snapshot older than the TTL is never offered for
//! restore; it is deleted on sight.

use crate::error::StorageError;
use crate::types::{Answers, CandidateMeta};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Persisted answers plus metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSnapshot {
    pub answers: Answers,
    pub candidate: CandidateMeta,
    pub saved_at: DateTime<Utc>,
}

impl DraftSnapshot {
    pub fn new(answers: Answers, candidate: CandidateMeta, saved_at: DateTime<Utc>) -> Self {
        Self {
            answers,
            candidate,
            saved_at,
        }
    }

    /// Age in seconds relative to `now`
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.saved_at).num_seconds()
    }

    /// Restorable while the age is within `ttl`
    pub fn is_restorable(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.saved_at <= ttl
    }
}

/// Durable local key-value store
pub trait DraftStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Deleting an absent key succeeds
    fn delete(&mut self, key: &str) -> Result<(), StorageError>;

    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<String, String>,
    fail_writes: bool,
    writes: u32,
}

/// In-memory store; clones share entries
#[derive(Debug, Clone, Default)]
pub struct MemoryDraftStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every `set` fail, as a full or unavailable store would
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Successful `set` calls so far
    pub fn write_count(&self) -> u32 {
        self.lock().writes
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }
}

impl DraftStore for MemoryDraftStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(StorageError::Unavailable("store rejected write".to_string()));
        }
        state.entries.insert(key.to_string(), value.to_string());
        state.writes += 1;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.lock().entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock().entries.keys().cloned().collect())
    }
}

/// One JSON file per key under a directory
#[derive(Debug, Clone)]
pub struct FileDraftStore {
    dir: PathBuf,
}

impl FileDraftStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::Unavailable(format!("invalid key {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl DraftStore for FileDraftStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.path_for(key)?) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Listing entry for stored drafts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftListing {
    pub key: String,
    /// None when the stored value does not parse
    pub saved_at: Option<DateTime<Utc>>,
    pub age_seconds: Option<i64>,
    pub answered: usize,
    pub restorable: bool,
}

/// Draft lifecycle for one assessment kind
#[derive(Debug, Clone)]
pub struct DraftPersistence {
    key: String,
    ttl: Duration,
}

impl DraftPersistence {
    pub fn new(assessment_kind: &str, ttl: Duration) -> Self {
        Self {
            key: Self::key_for(assessment_kind),
            ttl,
        }
    }

    /// Storage key for an assessment kind
    pub fn key_for(assessment_kind: &str) -> String {
        let slug: String = assessment_kind
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        format!("{slug}-draft")
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn save(
        &self,
        store: &mut dyn DraftStore,
        snapshot: &DraftSnapshot,
    ) -> Result<(), StorageError> {
        let json = serde_json::to_string(snapshot)?;
        store.set(&self.key, &json)?;
        debug!(key = %self.key, answered = snapshot.answers.len(), "draft saved");
        Ok(())
    }

    /// Return the stored snapshot if it is still fresh. Stale or unreadable
    /// snapshots are deleted and reported as absent.
    pub fn load_restorable(
        &self,
        store: &mut dyn DraftStore,
        now: DateTime<Utc>,
    ) -> Result<Option<DraftSnapshot>, StorageError> {
        let Some(raw) = store.get(&self.key)? else {
            return Ok(None);
        };

        let snapshot: DraftSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(key = %self.key, error = %e, "discarding unreadable draft");
                store.delete(&self.key)?;
                return Ok(None);
            }
        };

        if !snapshot.is_restorable(now, self.ttl) {
            info!(
                key = %self.key,
                age_seconds = snapshot.age_seconds(now),
                "discarding expired draft"
            );
            store.delete(&self.key)?;
            return Ok(None);
        }

        Ok(Some(snapshot))
    }

    pub fn discard(&self, store: &mut dyn DraftStore) -> Result<(), StorageError> {
        store.delete(&self.key)?;
        debug!(key = %self.key, "draft deleted");
        Ok(())
    }
}

/// Describe every draft in `store`
pub fn list_drafts(
    store: &dyn DraftStore,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<Vec<DraftListing>, StorageError> {
    let mut listings = Vec::new();
    for key in store.keys()? {
        let parsed = store
            .get(&key)?
            .and_then(|raw| serde_json::from_str::<DraftSnapshot>(&raw).ok());
        listings.push(match parsed {
            Some(snapshot) => DraftListing {
                saved_at: Some(snapshot.saved_at),
                age_seconds: Some(snapshot.age_seconds(now)),
                answered: snapshot.answers.len(),
                restorable: snapshot.is_restorable(now, ttl),
                key,
            },
            None => DraftListing {
                key,
                saved_at: None,
                age_seconds: None,
                answered: 0,
                restorable: false,
            },
        });
    }
    Ok(listings)
}

/// Delete every draft that could not be restored; returns the removed keys
pub fn purge_stale(
    store: &mut dyn DraftStore,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<Vec<String>, StorageError> {
    let mut removed = Vec::new();
    for listing in list_drafts(store, now, ttl)? {
        if !listing.restorable {
            store.delete(&listing.key)?;
            removed.push(listing.key);
        }
    }
    if !removed.is_empty() {
        info!(count = removed.len(), "purged stale drafts");
    }
    Ok(removed)
}
