//! Flat snapshots, key encoding and the pending change log.
//!
//! A snapshot maps fully-qualified keys to values. The fully-qualified key of
//! local key `k` on node `a/b` is `a/b/k`; on the root node it is plain `k`.
//! Node existence is never stored, only inferred from key prefixes.

use std::collections::BTreeMap;

/// Separator between path segments and between a node path and its keys.
pub const SEPARATOR: char = '/';

/// The whole store as one fully-qualified key → value mapping.
///
/// Ordered so that rewriting an unchanged store produces an identical file.
pub type Snapshot = BTreeMap<String, String>;

/// Prefix shared by every fully-qualified key that belongs to the node at
/// `path` or one of its descendants.
#[must_use]
pub fn key_prefix(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{path}{SEPARATOR}")
    }
}

/// Fully-qualified key of `key` on the node at `path`.
#[must_use]
pub fn qualify(path: &str, key: &str) -> String {
    let mut out = key_prefix(path);
    out.push_str(key);
    out
}

/// Absolute path of child `name` under the node at `path`.
#[must_use]
pub fn child_path(path: &str, name: &str) -> String {
    qualify(path, name)
}

/// One recorded mutation, replayable against any snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Set a fully-qualified key.
    Put {
        /// Fully-qualified key.
        key: String,
        /// New value.
        value: String,
    },
    /// Delete a fully-qualified key.
    Remove {
        /// Fully-qualified key.
        key: String,
    },
    /// Delete every key of a node and all of its descendants.
    RemoveSubtree {
        /// Absolute path of the removed node.
        path: String,
    },
}

impl Change {
    /// Apply this mutation to `snapshot` in place.
    pub fn apply(&self, snapshot: &mut Snapshot) {
        match self {
            Change::Put { key, value } => {
                snapshot.insert(key.clone(), value.clone());
            }
            Change::Remove { key } => {
                snapshot.remove(key);
            }
            Change::RemoveSubtree { path } => {
                let prefix = key_prefix(path);
                snapshot.retain(|k, _| !k.starts_with(&prefix));
            }
        }
    }
}

/// Replay `changes` in order on top of `snapshot`.
///
/// Later changes win, and a pending change always wins over whatever was on
/// disk for the same key.
pub fn replay(snapshot: &mut Snapshot, changes: &[Change]) {
    for change in changes {
        change.apply(snapshot);
    }
}

/// Local keys of the node at `path`, excluding keys of its descendants.
#[must_use]
pub fn keys_of(snapshot: &Snapshot, path: &str) -> Vec<String> {
    let prefix = key_prefix(path);
    snapshot
        .range(prefix.clone()..)
        .map(|(k, _)| k)
        .take_while(|k| k.starts_with(&prefix))
        .filter_map(|k| {
            let rest = &k[prefix.len()..];
            (!rest.contains(SEPARATOR)).then(|| rest.to_string())
        })
        .collect()
}

/// Names of the children of the node at `path` that own at least one key.
#[must_use]
pub fn children_of(snapshot: &Snapshot, path: &str) -> Vec<String> {
    let prefix = key_prefix(path);
    let mut names: Vec<String> = Vec::new();
    for k in snapshot
        .range(prefix.clone()..)
        .map(|(k, _)| k)
        .take_while(|k| k.starts_with(&prefix))
    {
        let rest = &k[prefix.len()..];
        if let Some(idx) = rest.find(SEPARATOR) {
            let name = &rest[..idx];
            // keys sharing a child are adjacent in a sorted map
            if names.last().map(String::as_str) != Some(name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// `true` if any key lives at or below the node at `path`.
#[must_use]
pub fn has_entries_under(snapshot: &Snapshot, path: &str) -> bool {
    let prefix = key_prefix(path);
    snapshot
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(k, _)| k.starts_with(&prefix))
}
