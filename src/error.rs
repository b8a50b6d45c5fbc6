//! Unified error type for all store and node operations.

/// Things that can go wrong when using the store.
///
/// `Io`, `Lock` and `Parse` come from the backing store and surface through
/// `load`, `flush` and `sync`. The remaining variants are misuse of the node
/// API and should not be retried.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// File system problem (open, read, write, truncate).
    Io(String),
    /// An advisory lock on the backing file could not be obtained.
    Lock(String),
    /// The backing file holds content that cannot be decoded.
    Parse(String),
    /// A child name or key contains the path separator, or is empty where
    /// that is not allowed.
    InvalidName(String),
    /// The node (or one of its ancestors) has been removed.
    RemovedNode(String),
    /// Mutation attempted on a read-only store.
    ReadOnly(String),
    /// Operation not supported on this node (e.g. removing a root).
    Unsupported(String),
    /// Bad configuration (store home, lock timeout, etc.).
    Config(String),
}

impl Error {
    /// `true` for errors caused by misuse of the API rather than by the
    /// environment. Retrying these never helps.
    #[must_use]
    pub fn is_logic_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidName(_) | Error::RemovedNode(_) | Error::ReadOnly(_) | Error::Unsupported(_)
        )
    }

    /// `true` when the same call may succeed later (lock contention).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Lock(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(msg) => write!(f, "i/o error: {msg}"),
            Error::Lock(msg) => write!(f, "lock error: {msg}"),
            Error::Parse(msg) => write!(f, "parse error: {msg}"),
            Error::InvalidName(name) => write!(f, "invalid name: {name:?}"),
            Error::RemovedNode(path) => write!(f, "node has been removed: {path:?}"),
            Error::ReadOnly(msg) => write!(f, "read-only store: {msg}"),
            Error::Unsupported(msg) => write!(f, "unsupported operation: {msg}"),
            Error::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Error::Io(err.to_string())
        } else {
            Error::Parse(err.to_string())
        }
    }
}

/// Result alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
