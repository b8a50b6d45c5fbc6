use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tree_prefs::{
    BackingStore, Change, Error, FileStore, FlushPolicy, Format, Merged, Preferences, Result,
    Snapshot, StoreConfig,
};

fn temp_path(name: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("{name}.prefs"));
    (dir, path)
}

fn reopen(path: &PathBuf) -> Preferences {
    Preferences::open_detached(path, &StoreConfig::default())
}

#[test]
fn missing_file_is_an_empty_store() {
    let (_dir, path) = temp_path("missing");
    let root = reopen(&path);
    assert!(root.keys().unwrap().is_empty());
    assert!(root.children().unwrap().is_empty());
    assert!(!path.exists());
}

#[test]
fn example_scenario_round_trips() {
    let (_dir, path) = temp_path("scenario");
    {
        let root = Preferences::open(&path).unwrap();
        root.put("x", "1").unwrap();
        root.child("c").unwrap().put("y", "2").unwrap();
        root.flush().unwrap();
    }
    let root = reopen(&path);
    assert_eq!(root.keys().unwrap(), vec!["x"]);
    assert_eq!(root.children().unwrap(), vec!["c"]);
    assert_eq!(root.child("c").unwrap().get("y", "").unwrap(), "2");
}

#[test]
fn many_triples_round_trip() {
    let (_dir, path) = temp_path("triples");
    let triples: Vec<(String, String, String)> = (0..30)
        .map(|i| {
            (
                format!("n{}/m{}", i % 4, i % 3),
                format!("key {i}"),
                format!("value=\\{i}\n:#!"),
            )
        })
        .collect();
    {
        let root = reopen(&path);
        for (node, key, value) in &triples {
            root.node(node).unwrap().put(key, value).unwrap();
        }
        root.flush().unwrap();
    }
    let root = reopen(&path);
    for (node, key, value) in &triples {
        assert_eq!(&root.node(node).unwrap().get(key, "").unwrap(), value);
    }
}

#[test]
fn file_is_plain_properties() {
    let (_dir, path) = temp_path("format");
    let root = reopen(&path);
    root.put("x", "1").unwrap();
    root.node("app/window").unwrap().put("width", "800").unwrap();
    root.flush().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.starts_with('#'));
    assert!(raw.lines().any(|l| l == "x=1"));
    assert!(raw.lines().any(|l| l == "app/window/width=800"));
}

#[test]
fn json_format_round_trips() {
    let (_dir, path) = temp_path("json");
    let config = StoreConfig::new().format(Format::Json { pretty: true });
    {
        let root = Preferences::open_detached(&path, &config);
        root.child("c").unwrap().put("y", "2").unwrap();
        root.flush().unwrap();
    }
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"c/y\""));
    let root = Preferences::open_detached(&path, &config);
    assert_eq!(root.child("c").unwrap().get("y", "").unwrap(), "2");
}

#[test]
fn subtree_removal_is_persisted_and_spares_siblings() {
    let (_dir, path) = temp_path("subtree");
    {
        let root = reopen(&path);
        root.put("top", "t").unwrap();
        root.node("a/b").unwrap().put("k", "1").unwrap();
        root.child("a").unwrap().put("k", "2").unwrap();
        root.child("ab").unwrap().put("k", "3").unwrap();
        root.flush().unwrap();
    }
    {
        let root = reopen(&path);
        root.child("a").unwrap().remove_node().unwrap();
        root.flush().unwrap();
    }
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.lines().any(|l| l.starts_with("a/")));

    let root = reopen(&path);
    assert_eq!(root.children().unwrap(), vec!["ab"]);
    assert_eq!(root.child("ab").unwrap().get("k", "").unwrap(), "3");
    assert_eq!(root.get("top", "").unwrap(), "t");
    assert!(!root.node_exists("a").unwrap());
}

#[test]
fn flush_through_removed_handle_persists_removal() {
    let (_dir, path) = temp_path("removed_flush");
    let root = reopen(&path);
    let a = root.child("a").unwrap();
    a.put("k", "v").unwrap();
    root.flush().unwrap();

    a.remove_node().unwrap();
    a.flush().unwrap();
    assert!(reopen(&path).children().unwrap().is_empty());
}

#[test]
fn sync_through_removed_handle_persists_removal() {
    let (_dir, path) = temp_path("removed_sync");
    let root = reopen(&path);
    let b = root.node("a/b").unwrap();
    b.put("k", "v").unwrap();
    root.child("keep").unwrap().put("k", "v").unwrap();
    root.flush().unwrap();

    root.child("a").unwrap().remove_node().unwrap();
    b.sync().unwrap();
    assert!(!root.has_pending_changes());
    assert!(b.get_opt("k").is_err());
    assert_eq!(reopen(&path).children().unwrap(), vec!["keep"]);
}

#[test]
fn external_edit_is_preserved_by_sync() {
    let (_dir, path) = temp_path("external");
    let root = reopen(&path);
    root.put("mine", "before").unwrap();
    root.flush().unwrap();
    assert_eq!(root.get("mine", "").unwrap(), "before");

    root.put("mine", "after").unwrap();
    root.child("local").unwrap().put("k", "v").unwrap();

    // another writer appends directly to the file
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&path)
        .unwrap();
    writeln!(file, "theirs/key=external").unwrap();
    drop(file);

    root.sync().unwrap();
    let root = reopen(&path);
    assert_eq!(root.get("mine", "").unwrap(), "after");
    assert_eq!(root.child("local").unwrap().get("k", "").unwrap(), "v");
    assert_eq!(
        root.child("theirs").unwrap().get("key", "").unwrap(),
        "external"
    );
}

#[test]
fn pending_local_change_wins_over_external_value() {
    let (_dir, path) = temp_path("tie_break");
    let root = reopen(&path);
    root.put("k", "disk").unwrap();
    root.flush().unwrap();

    let other = reopen(&path);
    other.put("k", "other").unwrap();
    root.put("k", "local").unwrap();
    other.flush().unwrap();
    root.flush().unwrap();

    assert_eq!(reopen(&path).get("k", "").unwrap(), "local");
}

#[test]
fn local_put_survives_external_node_removal() {
    let (_dir, path) = temp_path("removal_tie");
    let root = reopen(&path);
    root.node("shared").unwrap().put("a", "1").unwrap();
    root.flush().unwrap();

    let other = reopen(&path);
    other.child("shared").unwrap().remove_node().unwrap();
    root.child("shared").unwrap().put("b", "2").unwrap();
    other.flush().unwrap();
    root.flush().unwrap();

    let shared = reopen(&path).child("shared").unwrap();
    assert_eq!(shared.keys().unwrap(), vec!["b"]);
}

#[test]
fn warm_cache_reloads_after_file_changes() {
    let (_dir, path) = temp_path("mtime");
    let reader = reopen(&path);
    let writer = reopen(&path);
    writer.put("k", "1").unwrap();
    writer.flush().unwrap();
    assert_eq!(reader.get("k", "").unwrap(), "1");

    // make sure the modification time moves on coarse-grained filesystems
    std::thread::sleep(Duration::from_millis(20));
    writer.put("k", "2").unwrap();
    writer.put("extra", "x").unwrap();
    writer.flush().unwrap();
    assert_eq!(reader.get("k", "").unwrap(), "2");
    assert_eq!(reader.keys().unwrap(), vec!["extra", "k"]);
}

#[test]
fn pending_changes_survive_a_reload() {
    let (_dir, path) = temp_path("reload_pending");
    let reader = reopen(&path);
    let writer = reopen(&path);
    reader.put("mine", "pending").unwrap();

    std::thread::sleep(Duration::from_millis(20));
    writer.put("theirs", "x").unwrap();
    writer.flush().unwrap();

    assert_eq!(reader.keys().unwrap(), vec!["mine", "theirs"]);
    assert!(reader.has_pending_changes());
}

/// File store that lets another writer in once, right after its own rewrite
/// released the lock and before the caller sees the result.
struct InterleavedStore {
    inner: FileStore,
    other: Mutex<Option<Preferences>>,
}

impl BackingStore for InterleavedStore {
    fn load(&self) -> Result<Snapshot> {
        self.inner.load()
    }

    fn rewrite(&self, changes: &[Change]) -> Result<Merged> {
        let merged = self.inner.rewrite(changes)?;
        if let Some(other) = self.other.lock().unwrap().take() {
            std::thread::sleep(Duration::from_millis(20));
            other.put("theirs", "x")?;
            other.flush()?;
        }
        Ok(merged)
    }

    fn modified(&self) -> Result<Option<SystemTime>> {
        self.inner.modified()
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[test]
fn write_right_after_flush_is_seen_by_warm_cache() {
    let (_dir, path) = temp_path("interleaved");
    let store = Arc::new(InterleavedStore {
        inner: FileStore::new(&path),
        other: Mutex::new(Some(reopen(&path))),
    });
    let root = Preferences::from_store(store, FlushPolicy::Manual);
    root.put("mine", "1").unwrap();
    root.flush().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("theirs=x"));
    assert_eq!(root.keys().unwrap(), vec!["mine", "theirs"]);
}

#[test]
fn sync_drops_warm_cache() {
    let (_dir, path) = temp_path("sync");
    let root = reopen(&path);
    root.put("a", "1").unwrap();
    root.sync().unwrap();
    assert!(!root.has_pending_changes());
    assert_eq!(root.get("a", "").unwrap(), "1");
}

#[test]
fn malformed_file_fails_load_and_is_left_alone() {
    let (_dir, path) = temp_path("malformed");
    std::fs::write(&path, "ok=1\nbad=\\uZZZZ\n").unwrap();
    let root = reopen(&path);
    let err = root.get_opt("ok").unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "{err}");
    assert!(root.put("x", "1").is_err());
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "ok=1\nbad=\\uZZZZ\n"
    );
}

#[test]
fn unreadable_location_is_an_io_error() {
    let (dir, _) = temp_path("io");
    // a directory where the file should be
    let path = dir.path().join("is_a_dir");
    std::fs::create_dir(&path).unwrap();
    let root = reopen(&path);
    let err = root.get_opt("k").unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err}");
}

#[test]
fn failed_flush_keeps_pending_changes() {
    let (_dir, path) = temp_path("retry");
    let root = reopen(&path);
    root.put("k", "v").unwrap();

    // block the file location so the rewrite cannot open it
    std::fs::create_dir(&path).unwrap();
    let err = root.flush().unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err}");
    assert!(root.has_pending_changes());

    std::fs::remove_dir(&path).unwrap();
    root.flush().unwrap();
    assert!(!root.has_pending_changes());
    assert_eq!(reopen(&path).get("k", "").unwrap(), "v");
}
