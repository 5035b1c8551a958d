use crate::word::WordId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const KEY_PREFIX: &str = "wordApp";
pub const DEFAULT_USER: &str = "user1";

/// A write the key-value store refused.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage quota exceeded writing {key} ({needed} of {quota} bytes)")]
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// String key-value storage scoped to one installation.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<(), PersistenceError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), PersistenceError> {
        (**self).set(key, value)
    }
}

/// In-memory store. A quota bounds the total bytes of keys plus values.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: HashMap::new(),
            quota: Some(quota),
        }
    }

    fn used_without(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), PersistenceError> {
        if let Some(quota) = self.quota {
            let needed = self.used_without(key) + key.len() + value.len();
            if needed > quota {
                return Err(PersistenceError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    quota,
                });
            }
        }
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
///
/// A missing or unreadable file opens as an empty store. Every `set` rewrites
/// the file through a sibling temporary file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "state file is corrupt, starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read state file, starting empty");
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, key: &str) -> Result<(), PersistenceError> {
        let bytes =
            serde_json::to_vec_pretty(&self.entries).map_err(|source| PersistenceError::Encode {
                key: key.to_string(),
                source,
            })?;
        let write_err = |source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), PersistenceError> {
        let previous = self.entries.insert(key.to_string(), value);
        let result = self.flush(key);
        if result.is_err() {
            // Keep memory in step with disk so a later write does not flush this value.
            match previous {
                Some(old) => self.entries.insert(key.to_string(), old),
                None => self.entries.remove(key),
            };
        }
        result
    }
}

/// Name selecting which known-word set is active.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Returns `None` for blank names.
    pub fn new(name: impl AsRef<str>) -> Option<Self> {
        let trimmed = name.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self(DEFAULT_USER.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Word ids one user has marked as known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnownWordSet(BTreeSet<WordId>);

impl KnownWordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: WordId) -> bool {
        self.0.contains(&id)
    }

    /// Flips membership and returns whether `id` is now known.
    pub fn toggle(&mut self, id: WordId) -> bool {
        if self.0.remove(&id) {
            false
        } else {
            self.0.insert(id);
            true
        }
    }

    pub fn insert(&mut self, id: WordId) -> bool {
        self.0.insert(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = WordId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<WordId> for KnownWordSet {
    fn from_iter<I: IntoIterator<Item = WordId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Per-user known-word persistence on top of a [`KeyValueStore`].
#[derive(Debug)]
pub struct UserStateStore<S> {
    store: S,
    default_user: UserId,
}

impl<S: KeyValueStore> UserStateStore<S> {
    pub fn new(store: S) -> Self {
        Self::with_default_user(store, UserId::default())
    }

    pub fn with_default_user(store: S, default_user: UserId) -> Self {
        Self {
            store,
            default_user,
        }
    }

    pub fn load_last_user(&self) -> UserId {
        self.store
            .get(&current_user_key())
            .and_then(UserId::new)
            .unwrap_or_else(|| self.default_user.clone())
    }

    pub fn set_last_user(&mut self, user: &UserId) -> Result<(), PersistenceError> {
        self.store.set(&current_user_key(), user.as_str().to_string())
    }

    /// Absent and corrupt entries both load as an empty set.
    pub fn load_known_words(&self, user: &UserId) -> KnownWordSet {
        let key = known_words_key(user);
        let Some(raw) = self.store.get(&key) else {
            return KnownWordSet::new();
        };
        match serde_json::from_str::<KnownWordSet>(&raw) {
            Ok(set) => {
                debug!(user = %user, known = set.len(), "Loaded known words");
                set
            }
            Err(err) => {
                warn!(user = %user, key = %key, error = %err, "ignoring corrupt known-word entry");
                KnownWordSet::new()
            }
        }
    }

    pub fn save_known_words(
        &mut self,
        user: &UserId,
        set: &KnownWordSet,
    ) -> Result<(), PersistenceError> {
        let key = known_words_key(user);
        let value = serde_json::to_string(set).map_err(|source| PersistenceError::Encode {
            key: key.clone(),
            source,
        })?;
        self.store.set(&key, value)
    }

    pub fn inner(&self) -> &S {
        &self.store
    }
}

fn current_user_key() -> String {
    format!("{KEY_PREFIX}_currentUser")
}

fn known_words_key(user: &UserId) -> String {
    format!("{KEY_PREFIX}_{user}_knownWords")
}
