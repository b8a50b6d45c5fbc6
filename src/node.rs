//! Preferences node tree: the hierarchical API over one store cache.
//!
//! ```rust,no_run
//! use tree_prefs::Preferences;
//!
//! let root = Preferences::open("app.prefs").unwrap();
//! root.put("theme", "dark").unwrap();
//! root.child("window").unwrap().put("width", "1280").unwrap();
//! root.flush().unwrap();
//! ```

use crate::backend::{BackingStore, FileStore, TransientStore};
use crate::cache::{NodeState, Session, StoreCache, ROOT_ID};
use crate::change::{self, Snapshot, SEPARATOR};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::flush::{AsyncFlushWorker, FlushPolicy};
use crate::registry;
use std::path::Path;
use std::sync::{Arc, Weak};

/// State shared by every node handle derived from one root.
struct Tree {
    cache: Arc<StoreCache>,
    policy: FlushPolicy,
    worker: Option<AsyncFlushWorker>,
}

impl Tree {
    fn new(cache: Arc<StoreCache>, policy: FlushPolicy) -> Self {
        let worker = match &policy {
            FlushPolicy::Async(interval) => {
                // Weak so the worker never keeps the cache alive on its own.
                let weak: Weak<StoreCache> = Arc::downgrade(&cache);
                Some(AsyncFlushWorker::start(*interval, move || {
                    if let Some(cache) = weak.upgrade() {
                        if let Err(err) = cache.flush() {
                            log::warn!(
                                "background flush of {} failed: {err}",
                                cache.store().describe()
                            );
                        }
                    }
                }))
            }
            _ => None,
        };
        Self {
            cache,
            policy,
            worker,
        }
    }

    fn after_mutation(&self) -> Result<()> {
        match &self.policy {
            FlushPolicy::Immediate => self.cache.flush(),
            FlushPolicy::Async(_) => {
                if let Some(w) = &self.worker {
                    w.trigger();
                }
                Ok(())
            }
            FlushPolicy::Manual => Ok(()),
        }
    }
}

/// Handle to one node of a preferences tree.
///
/// Cheap to clone. Handles of the same node share identity: two calls to
/// [`child`](Self::child) with the same name return equal handles until the
/// node is removed. All operations are thread-safe and serialized on the
/// tree's cache.
#[derive(Clone)]
pub struct Preferences {
    tree: Arc<Tree>,
    path: Arc<str>,
    id: u64,
}

impl Preferences {
    // ---- opening roots ----

    /// Root of the properties file at `path`, with blocking locks and manual
    /// flush. Opening the same file twice shares one cache.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &StoreConfig::default())
    }

    /// Root of the file at `path` using `config`'s lock policy, flush policy
    /// and format. The file store is registered for the shutdown flush.
    pub fn open_with(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let cache = registry::open_file(path.as_ref(), config)?;
        Ok(Self::with_cache(cache, config.flush_policy().clone()))
    }

    /// Root over a fresh file store with its own cache, bypassing the process
    /// registry: nothing is shared with other roots of the same file except
    /// the file and its locks, and the shutdown flush does not cover it.
    pub fn open_detached(path: impl AsRef<Path>, config: &StoreConfig) -> Self {
        let store = FileStore::with_options(path, config.file_format(), config.lock_policy());
        Self::from_store(Arc::new(store), config.flush_policy().clone())
    }

    /// Root over an in-memory map seeded with `initial`.
    pub fn from_map<I, K, V>(initial: I, read_only: bool) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let snapshot: Snapshot = initial
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_store(
            Arc::new(TransientStore::from_map(snapshot, read_only)),
            FlushPolicy::Manual,
        )
    }

    /// Root over an empty, writable in-memory map.
    pub fn transient() -> Self {
        Self::from_store(Arc::new(TransientStore::new()), FlushPolicy::Manual)
    }

    /// Root over any backing store, with its own cache. Not registered for
    /// the shutdown flush.
    pub fn from_store(store: Arc<dyn BackingStore>, policy: FlushPolicy) -> Self {
        Self::with_cache(Arc::new(StoreCache::new(store)), policy)
    }

    /// User-scope root: `<home>/user.prefs`, or a transient store when no
    /// store home is configured.
    pub fn user_root(config: &StoreConfig) -> Result<Self> {
        Self::scoped_root(config.user_store_path(), config, "user")
    }

    /// System-scope root: `<home>/system-<host>.prefs`, or a transient store
    /// when no store home is configured.
    pub fn system_root(config: &StoreConfig) -> Result<Self> {
        Self::scoped_root(config.system_store_path(), config, "system")
    }

    fn scoped_root(
        path: Option<std::path::PathBuf>,
        config: &StoreConfig,
        scope: &str,
    ) -> Result<Self> {
        match path {
            Some(path) => Self::open_with(path, config),
            None => {
                log::debug!("no store home configured, {scope} preferences are transient");
                Ok(Self::from_store(
                    Arc::new(TransientStore::new()),
                    config.flush_policy().clone(),
                ))
            }
        }
    }

    fn with_cache(cache: Arc<StoreCache>, policy: FlushPolicy) -> Self {
        Self {
            tree: Arc::new(Tree::new(cache, policy)),
            path: Arc::from(""),
            id: ROOT_ID,
        }
    }

    // ---- identity ----

    /// Absolute path: `""` for the root, `"a/b"` for child `b` of `a`.
    #[must_use]
    pub fn absolute_path(&self) -> &str {
        &self.path
    }

    /// Last path segment; empty for the root.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path
            .rsplit_once(SEPARATOR)
            .map_or(&*self.path, |(_, name)| name)
    }

    /// `true` for the root node.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Cache shared by every node of this tree.
    #[must_use]
    pub fn cache(&self) -> &Arc<StoreCache> {
        &self.tree.cache
    }

    /// Parent node, `None` for the root.
    pub fn parent(&self) -> Result<Option<Preferences>> {
        if self.is_root() {
            return Ok(None);
        }
        let session = self.live_session()?;
        let parent = self
            .path
            .rsplit_once(SEPARATOR)
            .map_or("", |(parent, _)| parent);
        // ancestors of a live node are live
        let id = session
            .live_id(parent)
            .ok_or_else(|| Error::RemovedNode(parent.to_string()))?;
        Ok(Some(self.handle(parent, id)))
    }

    /// Lifecycle state of this handle.
    pub fn state(&self) -> Result<NodeState> {
        self.tree.cache.session().state_of(&self.path, self.id)
    }

    // ---- keys ----

    /// Value of `key`, or `default` when absent.
    pub fn get(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.get_opt(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// Value of `key`, or `None` when absent.
    pub fn get_opt(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let mut session = self.live_session()?;
        session.activate(&self.path);
        session.get(&self.path, key)
    }

    /// Set `key` to `value`.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        {
            let mut session = self.live_session()?;
            session.put(&self.path, key, value)?;
            session.activate(&self.path);
        }
        self.tree.after_mutation()
    }

    /// Remove `key`. Removing an absent key is not an error.
    pub fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        {
            let mut session = self.live_session()?;
            session.remove(&self.path, key)?;
            session.activate(&self.path);
        }
        self.tree.after_mutation()
    }

    /// Remove every local key of this node; children are untouched.
    pub fn clear(&self) -> Result<()> {
        {
            let mut session = self.live_session()?;
            for key in session.keys_of(&self.path)? {
                session.remove(&self.path, &key)?;
            }
            session.activate(&self.path);
        }
        self.tree.after_mutation()
    }

    /// Local keys of this node, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut session = self.live_session()?;
        session.activate(&self.path);
        let mut keys = session.keys_of(&self.path)?;
        keys.sort();
        Ok(keys)
    }

    // ---- children ----

    /// Child `name`, instantiated on first access. `name` must be non-empty
    /// and free of `/`.
    pub fn child(&self, name: &str) -> Result<Preferences> {
        validate_child_name(name)?;
        let mut session = self.live_session()?;
        let path = change::child_path(&self.path, name);
        let id = session.realize(&path);
        Ok(self.handle(&path, id))
    }

    /// Descendant at relative `path` (`"a/b/c"`); `""` is this node.
    pub fn node(&self, path: &str) -> Result<Preferences> {
        if path.is_empty() {
            return self.live_session().map(|_| self.clone());
        }
        for segment in path.split(SEPARATOR) {
            validate_child_name(segment)?;
        }
        let mut session = self.live_session()?;
        let mut current = self.path.to_string();
        let mut id = self.id;
        for segment in path.split(SEPARATOR) {
            current = change::child_path(&current, segment);
            id = session.realize(&current);
        }
        Ok(self.handle(&current, id))
    }

    /// Whether the descendant at relative `path` exists, either in this
    /// process or in the store. `""` asks about this node and returns `false`
    /// once it has been removed instead of failing.
    pub fn node_exists(&self, path: &str) -> Result<bool> {
        let mut session = self.tree.cache.session();
        if path.is_empty() {
            return Ok(session.is_live(&self.path, self.id));
        }
        session.check_live(&self.path, self.id)?;
        for segment in path.split(SEPARATOR) {
            validate_child_name(segment)?;
        }
        let full = change::child_path(&self.path, path);
        if session.live_id(&full).is_some() {
            return Ok(true);
        }
        session.has_entries_under(&full)
    }

    /// Names of this node's children, sorted: those with stored keys plus
    /// those instantiated in this process.
    pub fn children(&self) -> Result<Vec<String>> {
        let mut session = self.live_session()?;
        let mut names = session.children_of(&self.path)?;
        names.extend(session.live_children(&self.path));
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Remove this node and its whole subtree. Handles to them become
    /// unusable; the next flush erases their keys from the store.
    pub fn remove_node(&self) -> Result<()> {
        if self.is_root() {
            return Err(Error::Unsupported("cannot remove a root node".into()));
        }
        {
            let mut session = self.live_session()?;
            session.remove_subtree(&self.path)?;
            session.forget_subtree(&self.path);
        }
        self.tree.after_mutation()
    }

    // ---- persistence ----

    /// Persist pending changes of the whole tree, keeping the cache warm.
    ///
    /// Like [`sync`](Self::sync), allowed on removed nodes so that a removal
    /// can be persisted through the handle that performed it.
    pub fn flush(&self) -> Result<()> {
        self.tree.cache.flush()
    }

    /// Persist pending changes of the whole tree and drop the cache so the
    /// next read sees the store's current contents. Allowed on removed nodes.
    pub fn sync(&self) -> Result<()> {
        self.tree.cache.sync()
    }

    /// `true` while changes are waiting for a flush.
    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        self.tree.cache.pending_changes() > 0
    }

    // ---- internal ----

    fn live_session(&self) -> Result<Session<'_>> {
        let session = self.tree.cache.session();
        session.check_live(&self.path, self.id)?;
        Ok(session)
    }

    fn handle(&self, path: &str, id: u64) -> Preferences {
        Preferences {
            tree: Arc::clone(&self.tree),
            path: Arc::from(path),
            id,
        }
    }
}

impl PartialEq for Preferences {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tree.cache, &other.tree.cache)
            && self.id == other.id
            && self.path == other.path
    }
}

impl Eq for Preferences {}

impl std::fmt::Debug for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preferences")
            .field("store", &self.tree.cache.store().describe())
            .field("path", &self.path)
            .field("policy", &self.tree.policy)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.path)
    }
}

fn validate_child_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(SEPARATOR) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<()> {
    if key.contains(SEPARATOR) {
        return Err(Error::InvalidName(key.to_string()));
    }
    Ok(())
}

