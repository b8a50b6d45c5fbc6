//! Store cache: the in-memory view of one backing store.
//!
//! Holds the most recently loaded snapshot, the log of changes not yet
//! persisted, and the set of nodes instantiated in this process. A single
//! mutex guards all of it; every node derived from the same root goes
//! through it.

use crate::backend::BackingStore;
use crate::change::{self, Change, Snapshot, SEPARATOR};
use crate::error::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub(crate) const ROOT_ID: u64 = 0;

/// Lifecycle of a node handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Referenced, but not yet known to hold any data.
    Unrealized,
    /// Read from or written to, or backed by persisted keys.
    Active,
    /// Removed together with its subtree. Terminal.
    Removed,
}

#[derive(Debug, Clone, Copy)]
struct NodeEntry {
    id: u64,
    active: bool,
}

#[derive(Debug, Default)]
pub(crate) struct CacheState {
    snapshot: Option<Snapshot>,
    changes: Vec<Change>,
    stamp: Option<SystemTime>,
    nodes: HashMap<String, NodeEntry>,
}

/// In-memory cache and change log in front of a [`BackingStore`].
pub struct StoreCache {
    store: Arc<dyn BackingStore>,
    state: Mutex<CacheState>,
    next_id: AtomicU64,
}

impl StoreCache {
    /// Wrap `store`. Nothing is loaded until first access.
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        let mut state = CacheState::default();
        state.nodes.insert(
            String::new(),
            NodeEntry {
                id: ROOT_ID,
                active: false,
            },
        );
        Self {
            store,
            state: Mutex::new(state),
            next_id: AtomicU64::new(ROOT_ID + 1),
        }
    }

    /// The store behind this cache.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    pub(crate) fn session(&self) -> Session<'_> {
        Session {
            cache: self,
            state: self.state.lock(),
        }
    }

    /// Value of `key` on the node at `path`.
    pub fn get(&self, path: &str, key: &str) -> Result<Option<String>> {
        self.session().get(path, key)
    }

    /// Set `key` on the node at `path`, visible immediately and recorded for
    /// the next flush.
    pub fn put(&self, path: &str, key: &str, value: &str) -> Result<()> {
        self.session().put(path, key, value)
    }

    /// Remove `key` from the node at `path`.
    pub fn remove(&self, path: &str, key: &str) -> Result<()> {
        self.session().remove(path, key)
    }

    /// Remove every key of the node at `path` and of all its descendants.
    pub fn remove_subtree(&self, path: &str) -> Result<()> {
        self.session().remove_subtree(path)
    }

    /// Local keys of the node at `path`.
    pub fn keys_of(&self, path: &str) -> Result<Vec<String>> {
        self.session().keys_of(path)
    }

    /// Children of the node at `path` that own persisted or pending keys.
    pub fn children_of(&self, path: &str) -> Result<Vec<String>> {
        self.session().children_of(path)
    }

    /// Persist pending changes, keeping the cache warm. No-op when nothing is
    /// pending.
    pub fn flush(&self) -> Result<()> {
        self.session().flush()
    }

    /// Persist pending changes and drop the cache so the next access reloads.
    pub fn sync(&self) -> Result<()> {
        self.session().sync()
    }

    /// Number of changes waiting for the next flush.
    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.state.lock().changes.len()
    }

    /// Flush, giving up if the cache stays busy for `wait`. Returns `false`
    /// when the cache could not be entered in time.
    #[cfg_attr(not(unix), allow(dead_code))]
    pub(crate) fn flush_within(&self, wait: Duration) -> Result<bool> {
        match self.state.try_lock_for(wait) {
            Some(state) => {
                Session { cache: self, state }.flush()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for StoreCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCache")
            .field("store", &self.store.describe())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to the cache for one logical operation.
pub(crate) struct Session<'a> {
    cache: &'a StoreCache,
    state: MutexGuard<'a, CacheState>,
}

impl Session<'_> {
    fn store(&self) -> &dyn BackingStore {
        self.cache.store.as_ref()
    }

    /// Loads on first use and reloads when the store changed underneath us.
    /// Pending changes are replayed over a reload so they stay visible.
    fn snapshot(&mut self) -> Result<&mut Snapshot> {
        let stamp = self.store().modified()?;
        let stale = self.state.snapshot.is_none() || stamp != self.state.stamp;
        if stale {
            let mut fresh = self.store().load()?;
            if self.state.snapshot.is_some() {
                log::trace!(
                    "{} changed on disk, reloading cache",
                    self.store().describe()
                );
            }
            change::replay(&mut fresh, &self.state.changes);
            self.state.snapshot = Some(fresh);
            self.state.stamp = stamp;
        }
        Ok(self.state.snapshot.get_or_insert_with(Snapshot::new))
    }

    fn record(&mut self, change: Change) -> Result<()> {
        if self.store().is_read_only() {
            return Err(Error::ReadOnly(self.store().describe()));
        }
        let snapshot = self.snapshot()?;
        change.apply(snapshot);
        self.state.changes.push(change);
        Ok(())
    }

    pub(crate) fn get(&mut self, path: &str, key: &str) -> Result<Option<String>> {
        let fq = change::qualify(path, key);
        Ok(self.snapshot()?.get(&fq).cloned())
    }

    pub(crate) fn put(&mut self, path: &str, key: &str, value: &str) -> Result<()> {
        self.record(Change::Put {
            key: change::qualify(path, key),
            value: value.to_string(),
        })
    }

    pub(crate) fn remove(&mut self, path: &str, key: &str) -> Result<()> {
        self.record(Change::Remove {
            key: change::qualify(path, key),
        })
    }

    pub(crate) fn remove_subtree(&mut self, path: &str) -> Result<()> {
        self.record(Change::RemoveSubtree {
            path: path.to_string(),
        })
    }

    pub(crate) fn keys_of(&mut self, path: &str) -> Result<Vec<String>> {
        Ok(change::keys_of(self.snapshot()?, path))
    }

    pub(crate) fn children_of(&mut self, path: &str) -> Result<Vec<String>> {
        Ok(change::children_of(self.snapshot()?, path))
    }

    pub(crate) fn has_entries_under(&mut self, path: &str) -> Result<bool> {
        Ok(change::has_entries_under(self.snapshot()?, path))
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.state.changes.is_empty() {
            return Ok(());
        }
        let merged = self.store().rewrite(&self.state.changes)?;
        self.state.changes.clear();
        self.state.snapshot = Some(merged.snapshot);
        self.state.stamp = merged.stamp;
        Ok(())
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        if !self.state.changes.is_empty() {
            self.store().rewrite(&self.state.changes)?;
            self.state.changes.clear();
        }
        self.state.snapshot = None;
        self.state.stamp = None;
        Ok(())
    }

    // ---- in-process node bookkeeping ----

    /// Id of the live node at `path`, instantiating it if needed.
    pub(crate) fn realize(&mut self, path: &str) -> u64 {
        if let Some(entry) = self.state.nodes.get(path) {
            return entry.id;
        }
        let id = self.cache.allocate_id();
        self.state
            .nodes
            .insert(path.to_string(), NodeEntry { id, active: false });
        id
    }

    pub(crate) fn is_live(&self, path: &str, id: u64) -> bool {
        self.state.nodes.get(path).is_some_and(|e| e.id == id)
    }

    /// Fails with [`Error::RemovedNode`] unless the handle is still live.
    pub(crate) fn check_live(&self, path: &str, id: u64) -> Result<()> {
        if self.is_live(path, id) {
            Ok(())
        } else {
            Err(Error::RemovedNode(path.to_string()))
        }
    }

    pub(crate) fn live_id(&self, path: &str) -> Option<u64> {
        self.state.nodes.get(path).map(|e| e.id)
    }

    pub(crate) fn activate(&mut self, path: &str) {
        if let Some(entry) = self.state.nodes.get_mut(path) {
            entry.active = true;
        }
    }

    pub(crate) fn state_of(&mut self, path: &str, id: u64) -> Result<NodeState> {
        match self.state.nodes.get(path).copied() {
            Some(e) if e.id == id && e.active => Ok(NodeState::Active),
            Some(e) if e.id == id => {
                if self.has_entries_under(path)? {
                    self.activate(path);
                    Ok(NodeState::Active)
                } else {
                    Ok(NodeState::Unrealized)
                }
            }
            _ => Ok(NodeState::Removed),
        }
    }

    /// Drop the node at `path` and its descendants from the live set.
    pub(crate) fn forget_subtree(&mut self, path: &str) {
        let prefix = change::key_prefix(path);
        self.state
            .nodes
            .retain(|p, _| p != path && !(p.starts_with(&prefix) && !prefix.is_empty()));
    }

    /// Names of live children of `path` instantiated in this process.
    pub(crate) fn live_children(&self, path: &str) -> Vec<String> {
        let prefix = change::key_prefix(path);
        self.state
            .nodes
            .keys()
            .filter(|p| !p.is_empty())
            .filter_map(|p| p.strip_prefix(prefix.as_str()))
            .filter(|rest| !rest.is_empty() && !rest.contains(SEPARATOR))
            .map(str::to_string)
            .collect()
    }
}
