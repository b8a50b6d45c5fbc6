//! Opening files readable and writable by the current user only.
//!
//! On unix the file gets mode `0600` and missing parent directories `0700`.
//!
//! Windows ACLs are not supported: on non-unix targets files and directories
//! are created with the platform's default access, which usually means
//! whatever the parent directory grants. A warning naming the first affected
//! path is logged once per process. Put the store home under a per-user
//! directory (such as `%LOCALAPPDATA%`) there.

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::path::Path;

#[cfg(unix)]
const FILE_MODE: u32 = 0o600;
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// Create or open `path` with owner-only access (unix only, see the
/// module docs).
///
/// `options` carries the caller's read/write/truncate flags; `create(true)`
/// is always added. Missing parent directories are created owner-only too.
pub fn open_owner_only(path: &Path, options: &OpenOptions) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dirs_owner_only(parent)?;
    }
    let mut options = options.clone();
    options.create(true);
    restrict_new_file(&mut options);
    let file = options.open(path)?;
    tighten_existing(path, &file);
    Ok(file)
}

/// Create `dir` and any missing ancestors with owner-only access.
pub fn create_dirs_owner_only(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    #[cfg(not(unix))]
    warn_degraded(dir);
    builder.create(dir)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_new_file(options: &mut OpenOptions) {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(FILE_MODE);
}

#[cfg(not(unix))]
fn restrict_new_file(_options: &mut OpenOptions) {}

/// `mode` only applies to newly created files; an existing file that is
/// group- or world-accessible is narrowed here. Failure (e.g. not the owner)
/// is logged, not fatal.
#[cfg(unix)]
fn tighten_existing(path: &Path, file: &File) {
    use std::os::unix::fs::PermissionsExt;
    let metadata = match file.metadata() {
        Ok(m) => m,
        Err(err) => {
            log::warn!("cannot stat {}: {err}", path.display());
            return;
        }
    };
    let mut perms = metadata.permissions();
    if perms.mode() & 0o077 == 0 {
        return;
    }
    perms.set_mode(perms.mode() & !0o077);
    if let Err(err) = file.set_permissions(perms) {
        log::warn!(
            "cannot restrict permissions of {} to owner-only: {err}",
            path.display()
        );
    }
}

#[cfg(not(unix))]
fn tighten_existing(path: &Path, _file: &File) {
    warn_degraded(path);
}

#[cfg(not(unix))]
fn warn_degraded(path: &Path) {
    static WARNED: std::sync::Once = std::sync::Once::new();
    WARNED.call_once(|| {
        log::warn!(
            "Windows ACLs are not supported; {} and later store files keep default access",
            path.display()
        );
    });
}
