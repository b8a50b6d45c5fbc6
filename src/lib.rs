//! Hierarchical, file-backed preferences store.
//!
//! A tree of nodes, each with its own string key-value map and named
//! children, persisted as one flat properties file. Reads come from an
//! in-memory cache that reloads when the file changes on disk; writes are
//! buffered as a change log and merged into the file under an exclusive
//! advisory lock on `flush`/`sync`, so entries written by other processes in
//! the meantime survive.
//!
//! ```rust,no_run
//! use tree_prefs::Preferences;
//!
//! let root = Preferences::open("app.prefs").unwrap();
//! root.put("x", "1").unwrap();
//! root.child("c").unwrap().put("y", "2").unwrap();
//! root.flush().unwrap();
//!
//! assert_eq!(root.keys().unwrap(), ["x"]);
//! assert_eq!(root.children().unwrap(), ["c"]);
//! ```
//!
//! **Cross-process safety is cooperative.** Every process touching the file
//! must go through this crate (or honor the same `flock`-style locks).

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod cache;
pub mod change;
pub mod config;
pub mod error;
pub mod flush;
pub mod node;
pub mod persist;
pub mod registry;
pub mod serializer;
mod typed;
pub mod user_file;

pub use backend::{BackingStore, FileStore, Merged, TransientStore};
pub use cache::{NodeState, StoreCache};
pub use change::{Change, Snapshot};
pub use config::{Format, LockPolicy, StoreConfig};
pub use error::{Error, Result};
pub use flush::FlushPolicy;
pub use node::Preferences;
