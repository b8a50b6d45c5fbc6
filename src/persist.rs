//! Disk I/O helpers: locked load and locked in-place rewrite.
//!
//! Both helpers hold an advisory lock on the store file itself for the whole
//! operation: shared while loading, exclusive while rewriting. The rewrite
//! truncates and writes the same inode rather than renaming a temp file over
//! it, since a rename would hand other processes a different file to lock.
//! Locks are cooperative; a writer that ignores them can still corrupt the
//! file.

use crate::backend::Merged;
use crate::change::{replay, Change, Snapshot};
use crate::config::LockPolicy;
use crate::error::{Error, Result};
use crate::serializer::Serializer;
use crate::user_file::open_owner_only;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

const LOCK_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    Shared,
    Exclusive,
}

/// Reads and decodes the file at `path` under a shared lock. Returns an empty
/// snapshot if the file is missing or empty (not an error).
pub fn load(path: &Path, serializer: &dyn Serializer, policy: LockPolicy) -> Result<Snapshot> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Snapshot::new()),
        Err(e) => return Err(io_error("open", path, &e)),
    };
    acquire(&file, LockKind::Shared, policy, path)?;
    let snapshot = read_snapshot(&mut file, path, serializer)?;
    log::debug!("loaded {} entries from {}", snapshot.len(), path.display());
    Ok(snapshot)
}

/// Merge `changes` into the file at `path` under an exclusive lock and return
/// the merged snapshot with the file's modification time as we left it.
///
/// The file is re-read after the lock is granted, so entries written by other
/// processes since our last load survive unless a pending change overwrites
/// them. The stamp is taken before the lock is released.
pub fn rewrite(
    path: &Path,
    serializer: &dyn Serializer,
    policy: LockPolicy,
    changes: &[Change],
) -> Result<Merged> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true);
    let mut file = open_owner_only(path, &opts)?;
    acquire(&file, LockKind::Exclusive, policy, path)?;

    let mut snapshot = read_snapshot(&mut file, path, serializer)?;
    replay(&mut snapshot, changes);
    let bytes = serializer.serialize(&snapshot)?;

    file.set_len(0).map_err(|e| io_error("truncate", path, &e))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| io_error("seek", path, &e))?;
    file.write_all(&bytes)
        .map_err(|e| io_error("write", path, &e))?;
    file.sync_data().map_err(|e| io_error("sync", path, &e))?;
    let stamp = file
        .metadata()
        .and_then(|meta| meta.modified())
        .map_err(|e| io_error("stat", path, &e))?;
    log::debug!(
        "rewrote {} with {} entries ({} pending changes)",
        path.display(),
        snapshot.len(),
        changes.len()
    );
    // lock released when `file` is closed
    Ok(Merged {
        snapshot,
        stamp: Some(stamp),
    })
}

/// Modification time of `path`, or `None` if it does not exist.
pub fn modified(path: &Path) -> Result<Option<SystemTime>> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.modified().map_err(|e| io_error("stat", path, &e))?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error("stat", path, &e)),
    }
}

fn read_snapshot(file: &mut File, path: &Path, serializer: &dyn Serializer) -> Result<Snapshot> {
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| io_error("read", path, &e))?;
    if bytes.is_empty() {
        return Ok(Snapshot::new());
    }
    serializer.deserialize(&bytes).map_err(|e| match e {
        Error::Parse(msg) => Error::Parse(format!("{}: {msg}", path.display())),
        other => other,
    })
}

fn acquire(file: &File, kind: LockKind, policy: LockPolicy, path: &Path) -> Result<()> {
    match policy {
        LockPolicy::Block => {
            let res = match kind {
                LockKind::Shared => FileExt::lock_shared(file),
                LockKind::Exclusive => FileExt::lock_exclusive(file),
            };
            res.map_err(|e| lock_error(kind, path, &e.to_string()))
        }
        LockPolicy::NonBlocking => match try_acquire(file, kind) {
            Ok(true) => Ok(()),
            Ok(false) => Err(lock_error(kind, path, "held by another handle")),
            Err(e) => Err(lock_error(kind, path, &e.to_string())),
        },
        LockPolicy::Timeout(limit) => {
            let deadline = Instant::now() + limit;
            loop {
                match try_acquire(file, kind) {
                    Ok(true) => return Ok(()),
                    Ok(false) if Instant::now() >= deadline => {
                        return Err(lock_error(
                            kind,
                            path,
                            &format!("still held after {limit:?}"),
                        ))
                    }
                    Ok(false) => std::thread::sleep(LOCK_POLL),
                    Err(e) => return Err(lock_error(kind, path, &e.to_string())),
                }
            }
        }
    }
}

/// `Ok(false)` when the lock is held elsewhere.
fn try_acquire(file: &File, kind: LockKind) -> std::io::Result<bool> {
    let res = match kind {
        LockKind::Shared => FileExt::try_lock_shared(file),
        LockKind::Exclusive => FileExt::try_lock_exclusive(file),
    };
    match res {
        Ok(()) => Ok(true),
        Err(e) if is_contended(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn lock_error(kind: LockKind, path: &Path, detail: &str) -> Error {
    let kind = match kind {
        LockKind::Shared => "shared",
        LockKind::Exclusive => "exclusive",
    };
    Error::Lock(format!("{kind} lock on {}: {detail}", path.display()))
}

fn io_error(op: &str, path: &Path, err: &std::io::Error) -> Error {
    Error::Io(format!("{op} {}: {err}", path.display()))
}
