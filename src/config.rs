//! Store configuration: store home, lock policy, flush policy and file format.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tree_prefs::{LockPolicy, Preferences, StoreConfig};
//!
//! let config = StoreConfig::new()
//!     .home("/var/lib/myapp/prefs")
//!     .lock(LockPolicy::Timeout(Duration::from_secs(2)));
//! let root = Preferences::user_root(&config).unwrap();
//! ```

use crate::error::{Error, Result};
use crate::flush::FlushPolicy;
use crate::serializer::{JsonSerializer, PropertiesSerializer, Serializer};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable naming the store home directory.
pub const HOME_ENV: &str = "TREE_PREFS_HOME";
/// Environment variable holding a lock wait bound in milliseconds.
pub const LOCK_TIMEOUT_ENV: &str = "TREE_PREFS_LOCK_TIMEOUT_MS";
/// File name of the user-scope store inside the store home.
pub const USER_FILE_NAME: &str = "user.prefs";

const FILE_HEADER: &str = "tree-prefs store";

/// How long to wait for an advisory lock on the store file.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    /// Wait until the lock is granted.
    #[default]
    Block,
    /// Poll until the lock is granted or the bound passes, then fail with
    /// [`Error::Lock`].
    Timeout(Duration),
    /// Try once and fail with [`Error::Lock`] if the lock is held.
    NonBlocking,
}

/// Encoding of the store file.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// `key=value` properties lines.
    #[default]
    Properties,
    /// One flat JSON object.
    Json {
        /// Indent the output.
        pretty: bool,
    },
}

impl Format {
    pub(crate) fn serializer(self) -> Arc<dyn Serializer> {
        match self {
            Format::Properties => Arc::new(PropertiesSerializer::with_header(FILE_HEADER)),
            Format::Json { pretty: true } => Arc::new(JsonSerializer::pretty()),
            Format::Json { pretty: false } => Arc::new(JsonSerializer::new()),
        }
    }
}

/// Settings used to open stores.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    home: Option<PathBuf>,
    lock: LockPolicy,
    flush: FlushPolicy,
    format: Format,
}

impl StoreConfig {
    /// No store home, blocking locks, manual flush, properties format.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read [`HOME_ENV`] and [`LOCK_TIMEOUT_ENV`] from the environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(
            std::env::var_os(HOME_ENV),
            std::env::var(LOCK_TIMEOUT_ENV).ok(),
        )
    }

    fn from_vars(home: Option<OsString>, lock_timeout_ms: Option<String>) -> Result<Self> {
        let mut config = Self::new();
        if let Some(home) = home.filter(|h| !h.is_empty()) {
            config.home = Some(PathBuf::from(home));
        }
        if let Some(raw) = lock_timeout_ms {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{LOCK_TIMEOUT_ENV} must be milliseconds, got {raw:?}"))
            })?;
            config.lock = LockPolicy::Timeout(Duration::from_millis(ms));
        }
        Ok(config)
    }

    /// Directory holding the default user and system stores.
    pub fn home(mut self, home: impl AsRef<Path>) -> Self {
        self.home = Some(home.as_ref().to_path_buf());
        self
    }

    /// Set the lock policy (default: [`LockPolicy::Block`]).
    pub fn lock(mut self, lock: LockPolicy) -> Self {
        self.lock = lock;
        self
    }

    /// Set the flush policy (default: [`FlushPolicy::Manual`]).
    pub fn flush(mut self, flush: FlushPolicy) -> Self {
        self.flush = flush;
        self
    }

    /// Set the file format (default: [`Format::Properties`]).
    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Configured store home, if any.
    #[must_use]
    pub fn home_dir(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    /// Configured lock policy.
    #[must_use]
    pub fn lock_policy(&self) -> LockPolicy {
        self.lock
    }

    /// Configured flush policy.
    #[must_use]
    pub fn flush_policy(&self) -> &FlushPolicy {
        &self.flush
    }

    /// Configured file format.
    #[must_use]
    pub fn file_format(&self) -> Format {
        self.format
    }

    /// `<home>/user.prefs`, or `None` without a store home.
    #[must_use]
    pub fn user_store_path(&self) -> Option<PathBuf> {
        self.home.as_ref().map(|h| h.join(USER_FILE_NAME))
    }

    /// `<home>/system-<host>.prefs`, or `None` without a store home.
    #[must_use]
    pub fn system_store_path(&self) -> Option<PathBuf> {
        self.home
            .as_ref()
            .map(|h| h.join(format!("system-{}.prefs", host_id())))
    }
}

/// Identifier of this machine used to name the system-scope store: the host
/// name restricted to `[A-Za-z0-9._-]`, or `localhost` if unavailable.
#[must_use]
pub fn host_id() -> String {
    let raw = raw_host_name().unwrap_or_default();
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "localhost".to_string()
    } else {
        cleaned
    }
}

fn raw_host_name() -> Option<String> {
    whoami::fallible::hostname()
        .map_err(|err| log::debug!("host name unavailable: {err}"))
        .ok()
}
