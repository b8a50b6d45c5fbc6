//! Pluggable backing stores.
//!
//! Implement [`BackingStore`] to persist snapshots somewhere other than a
//! local file. Two stores ship with the crate: [`FileStore`] (lock-protected
//! file) and [`TransientStore`] (in-memory map).

use crate::change::{replay, Change, Snapshot};
use crate::config::{Format, LockPolicy};
use crate::error::{Error, Result};
use crate::persist;
use crate::serializer::Serializer;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Result of [`BackingStore::rewrite`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Merged {
    /// Durable contents after the rewrite.
    pub snapshot: Snapshot,
    /// Change stamp of exactly these contents, read before any other writer
    /// could get in. `None` when the store has no stamps.
    pub stamp: Option<SystemTime>,
}

/// Durable home of one flat snapshot.
pub trait BackingStore: Send + Sync {
    /// Current contents. A store that was never written yields an empty
    /// snapshot.
    fn load(&self) -> Result<Snapshot>;

    /// Replay `changes` on top of the current durable contents, persist the
    /// result and return it. Must be atomic with respect to other writers
    /// following the same discipline, and the returned stamp must describe
    /// the returned contents, not a later write.
    fn rewrite(&self, changes: &[Change]) -> Result<Merged>;

    /// Change stamp of the durable contents. A cache reloads when this
    /// differs from the stamp seen at its last load. `None` means "unknown";
    /// stores that never change underneath us can keep the default.
    fn modified(&self) -> Result<Option<SystemTime>> {
        Ok(None)
    }

    /// Whether mutations are refused.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Short human-readable name for logs.
    fn describe(&self) -> String;
}

// ---- file --------------------------------------------------------------------

/// Snapshot stored in one file, guarded by advisory locks.
pub struct FileStore {
    path: PathBuf,
    serializer: Arc<dyn Serializer>,
    lock: LockPolicy,
}

impl FileStore {
    /// Properties file at `path` with blocking locks.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_options(path, Format::default(), LockPolicy::default())
    }

    /// File at `path` in the given format and lock policy.
    pub fn with_options(path: impl AsRef<Path>, format: Format, lock: LockPolicy) -> Self {
        Self::with_serializer(path, format.serializer(), lock)
    }

    /// File at `path` using a custom [`Serializer`].
    pub fn with_serializer(
        path: impl AsRef<Path>,
        serializer: Arc<dyn Serializer>,
        lock: LockPolicy,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            serializer,
            lock,
        }
    }

    /// Path to the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock policy used for loads and rewrites.
    #[must_use]
    pub fn lock_policy(&self) -> LockPolicy {
        self.lock
    }
}

impl BackingStore for FileStore {
    fn load(&self) -> Result<Snapshot> {
        persist::load(&self.path, self.serializer.as_ref(), self.lock)
    }

    fn rewrite(&self, changes: &[Change]) -> Result<Merged> {
        persist::rewrite(&self.path, self.serializer.as_ref(), self.lock, changes)
    }

    fn modified(&self) -> Result<Option<SystemTime>> {
        persist::modified(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

// ---- transient -----------------------------------------------------------------

/// Snapshot held in process memory only. Nothing survives the process.
#[derive(Debug, Default)]
pub struct TransientStore {
    map: Mutex<Snapshot>,
    read_only: bool,
}

impl TransientStore {
    /// Empty, writable store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `initial`. A read-only store refuses every rewrite
    /// that carries changes.
    pub fn from_map(initial: Snapshot, read_only: bool) -> Self {
        Self {
            map: Mutex::new(initial),
            read_only,
        }
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn contents(&self) -> Snapshot {
        self.map.lock().clone()
    }
}

impl BackingStore for TransientStore {
    fn load(&self) -> Result<Snapshot> {
        Ok(self.map.lock().clone())
    }

    fn rewrite(&self, changes: &[Change]) -> Result<Merged> {
        if self.read_only && !changes.is_empty() {
            return Err(Error::ReadOnly(self.describe()));
        }
        let mut map = self.map.lock();
        replay(&mut map, changes);
        Ok(Merged {
            snapshot: map.clone(),
            stamp: None,
        })
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn describe(&self) -> String {
        "<transient>".to_string()
    }
}
