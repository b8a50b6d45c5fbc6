//! Process-wide registry of open file stores and the shutdown flush.
//!
//! Every file opened through [`Preferences::open`](crate::Preferences::open)
//! is registered here under its resolved path; opening the same file again
//! reuses the registered cache. The first registration installs a process
//! exit hook (unix `atexit`) that flushes every registered store once.
//! Programs that exit by other routes can call [`flush_all`] themselves or
//! hold a [`ShutdownGuard`] in `main`.

use crate::backend::FileStore;
use crate::cache::StoreCache;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Once, OnceLock};
#[cfg(unix)]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(unix)]
use std::time::Duration;

/// How long the exit hook waits for a busy registry or cache before skipping.
#[cfg(unix)]
const EXIT_WAIT: Duration = Duration::from_secs(2);

static OPEN_STORES: OnceLock<Mutex<HashMap<PathBuf, Arc<StoreCache>>>> = OnceLock::new();
static HOOK: Once = Once::new();
#[cfg(unix)]
static EXIT_FLUSHED: AtomicBool = AtomicBool::new(false);

fn open_stores() -> &'static Mutex<HashMap<PathBuf, Arc<StoreCache>>> {
    OPEN_STORES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Cache of the file store at `path`, created and registered on first use.
///
/// A later open of the same file gets the registered cache; its lock policy
/// and format are the ones given at first open.
pub(crate) fn open_file(path: &Path, config: &StoreConfig) -> Result<Arc<StoreCache>> {
    let resolved = resolve(path)?;
    let mut stores = open_stores().lock();
    if let Some(cache) = stores.get(&resolved) {
        log::debug!("reusing open store {}", resolved.display());
        return Ok(Arc::clone(cache));
    }
    let store = FileStore::with_options(&resolved, config.file_format(), config.lock_policy());
    let cache = Arc::new(StoreCache::new(Arc::new(store)));
    stores.insert(resolved.clone(), Arc::clone(&cache));
    drop(stores);
    log::debug!("registered store {}", resolved.display());
    install_exit_hook();
    Ok(cache)
}

/// Number of registered stores.
#[must_use]
pub fn open_count() -> usize {
    open_stores().lock().len()
}

/// `true` if the file at `path` is registered.
pub fn is_registered(path: impl AsRef<Path>) -> Result<bool> {
    let resolved = resolve(path.as_ref())?;
    Ok(open_stores().lock().contains_key(&resolved))
}

/// Flush and unregister the store at `path`. Existing node handles keep
/// working but are no longer covered by the shutdown flush. Returns `false`
/// if it was not registered.
pub fn close(path: impl AsRef<Path>) -> Result<bool> {
    let resolved = resolve(path.as_ref())?;
    let cache = open_stores().lock().remove(&resolved);
    match cache {
        Some(cache) => {
            cache.flush()?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Flush every registered store. Failures are logged and returned, never
/// short-circuit the remaining stores.
pub fn flush_all() -> Vec<(PathBuf, Error)> {
    let stores: Vec<(PathBuf, Arc<StoreCache>)> = open_stores()
        .lock()
        .iter()
        .map(|(p, c)| (p.clone(), Arc::clone(c)))
        .collect();
    let mut failures = Vec::new();
    for (path, cache) in stores {
        if let Err(err) = cache.flush() {
            log::warn!("flush of {} failed: {err}", path.display());
            failures.push((path, err));
        }
    }
    failures
}

/// Calls [`flush_all`] when dropped.
///
/// ```rust,no_run
/// fn main() {
///     let _flush = tree_prefs::registry::shutdown_guard();
///     // ...
/// }
/// ```
#[must_use = "the guard flushes when dropped"]
#[derive(Debug)]
pub struct ShutdownGuard {
    _private: (),
}

/// Guard that flushes every registered store at the end of its scope.
pub fn shutdown_guard() -> ShutdownGuard {
    ShutdownGuard { _private: () }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = flush_all();
    }
}

/// Install the exit hook. Idempotent; called on first registration.
pub fn install_exit_hook() {
    HOOK.call_once(|| {
        #[cfg(unix)]
        {
            // SAFETY: flush_at_exit is a plain extern "C" fn that never
            // unwinds across the FFI boundary.
            let rc = unsafe { libc::atexit(flush_at_exit) };
            if rc == 0 {
                log::info!("installed preferences shutdown flush");
            } else {
                log::warn!(
                    "could not install preferences shutdown flush; call flush_all() before exit"
                );
            }
        }
        #[cfg(not(unix))]
        log::info!("no exit hook on this platform; call flush_all() or hold a ShutdownGuard");
    });
}

#[cfg(unix)]
extern "C" fn flush_at_exit() {
    let _ = std::panic::catch_unwind(flush_on_exit);
}

/// Best-effort flush of every registered store, at most once per process.
/// Waits a bounded time for a registry or cache held by a thread that is
/// still running, and logs instead of returning errors.
#[cfg(unix)]
fn flush_on_exit() {
    if EXIT_FLUSHED.swap(true, Ordering::SeqCst) {
        return;
    }
    let Some(guard) = open_stores().try_lock_for(EXIT_WAIT) else {
        log::warn!("store registry busy at exit, pending preferences not flushed");
        return;
    };
    let stores: Vec<(PathBuf, Arc<StoreCache>)> = guard
        .iter()
        .map(|(p, c)| (p.clone(), Arc::clone(c)))
        .collect();
    drop(guard);
    for (path, cache) in stores {
        match cache.flush_within(EXIT_WAIT) {
            Ok(true) => {}
            Ok(false) => log::warn!("{} busy at exit, not flushed", path.display()),
            Err(err) => log::warn!("flush of {} at exit failed: {err}", path.display()),
        }
    }
}

/// Absolute, lexically normalized form of `path` with symlinks resolved in
/// the deepest directory above it that exists. Components below that
/// directory are appended as written, so the key stays the same once they
/// get created.
fn resolve(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(Error::Config("store path is empty".into()));
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    let Some(name) = normalized.file_name().map(ToOwned::to_owned) else {
        return Err(Error::Config(format!(
            "store path {} has no file name",
            path.display()
        )));
    };
    let mut missing = vec![name];
    let mut dir = normalized.parent();
    while let Some(current) = dir {
        if let Ok(real) = std::fs::canonicalize(current) {
            let mut resolved = real;
            resolved.extend(missing.iter().rev());
            return Ok(resolved);
        }
        match current.file_name() {
            Some(segment) => missing.push(segment.to_owned()),
            None => break,
        }
        dir = current.parent();
    }
    Ok(normalized)
}
