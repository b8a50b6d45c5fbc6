use std::path::PathBuf;
use tempfile::TempDir;
use tree_prefs::{registry, FlushPolicy, Preferences, StoreConfig};

fn temp_path(name: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("{name}.prefs"));
    (dir, path)
}

#[test]
fn same_file_shares_one_cache() {
    let (dir, path) = temp_path("dedup");
    let a = Preferences::open(&path).unwrap();
    let b = Preferences::open(dir.path().join(".").join("dedup.prefs")).unwrap();
    assert!(std::sync::Arc::ptr_eq(a.cache(), b.cache()));
    assert_eq!(a.child("n").unwrap(), b.child("n").unwrap());

    a.put("k", "v").unwrap();
    assert_eq!(b.get("k", "").unwrap(), "v");
    assert!(registry::is_registered(&path).unwrap());
    assert!(registry::close(&path).unwrap());
}

#[test]
fn flush_all_persists_every_registered_store() {
    let (_d1, p1) = temp_path("all_one");
    let (_d2, p2) = temp_path("all_two");
    let one = Preferences::open(&p1).unwrap();
    let two = Preferences::open(&p2).unwrap();
    one.put("a", "1").unwrap();
    two.child("c").unwrap().put("b", "2").unwrap();
    assert!(registry::open_count() >= 2);

    let failures = registry::flush_all();
    assert!(failures.iter().all(|(p, _)| p != &p1 && p != &p2));
    assert!(std::fs::read_to_string(&p1).unwrap().contains("a=1"));
    assert!(std::fs::read_to_string(&p2).unwrap().contains("c/b=2"));
    assert!(!one.has_pending_changes());
}

#[test]
fn shutdown_guard_flushes_on_drop() {
    let (_dir, path) = temp_path("guard");
    {
        let _flush = registry::shutdown_guard();
        let root = Preferences::open(&path).unwrap();
        root.put("late", "yes").unwrap();
    }
    assert!(std::fs::read_to_string(&path).unwrap().contains("late=yes"));
}

#[test]
fn close_flushes_and_unregisters() {
    let (_dir, path) = temp_path("close");
    let root = Preferences::open(&path).unwrap();
    root.put("k", "v").unwrap();
    assert!(registry::close(&path).unwrap());
    assert!(!registry::is_registered(&path).unwrap());
    assert!(!registry::close(&path).unwrap());
    assert!(std::fs::read_to_string(&path).unwrap().contains("k=v"));

    // a new open gets a fresh cache
    let again = Preferences::open(&path).unwrap();
    assert!(!std::sync::Arc::ptr_eq(root.cache(), again.cache()));
    assert_eq!(again.get("k", "").unwrap(), "v");
}

#[test]
fn detached_and_custom_stores_are_not_registered() {
    let (_dir, path) = temp_path("detached");
    let root = Preferences::open_detached(&path, &StoreConfig::new());
    root.put("k", "v").unwrap();
    assert!(!registry::is_registered(&path).unwrap());
    let _ = Preferences::from_store(
        std::sync::Arc::new(tree_prefs::TransientStore::new()),
        FlushPolicy::Manual,
    );
}

#[test]
fn user_and_system_roots_live_under_store_home() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new().home(dir.path().join("home"));
    let user = Preferences::user_root(&config).unwrap();
    let system = Preferences::system_root(&config).unwrap();
    user.put("who", "me").unwrap();
    system.put("who", "everyone").unwrap();
    user.flush().unwrap();
    system.flush().unwrap();

    let user_file = config.user_store_path().unwrap();
    let system_file = config.system_store_path().unwrap();
    assert_ne!(user_file, system_file);
    assert!(std::fs::read_to_string(user_file).unwrap().contains("who=me"));
    assert!(std::fs::read_to_string(system_file)
        .unwrap()
        .contains("who=everyone"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(dir.path().join("home"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o077, 0);
    }
}

#[test]
fn roots_without_store_home_are_transient() {
    let config = StoreConfig::new();
    let user = Preferences::user_root(&config).unwrap();
    user.put("k", "v").unwrap();
    user.flush().unwrap();
    assert_eq!(user.get("k", "").unwrap(), "v");
    assert!(user.cache().store().describe().contains("transient"));
}

#[cfg(unix)]
#[test]
fn directory_created_by_first_flush_keeps_one_registration() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("real")).unwrap();
    std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();
    let path = dir.path().join("link/sub/p.prefs");

    let first = Preferences::open(&path).unwrap();
    first.put("k", "v").unwrap();
    first.flush().unwrap();
    assert!(dir.path().join("real/sub/p.prefs").exists());

    let again = Preferences::open(&path).unwrap();
    assert!(std::sync::Arc::ptr_eq(first.cache(), again.cache()));
    let via_target = Preferences::open(dir.path().join("real/sub/p.prefs")).unwrap();
    assert!(std::sync::Arc::ptr_eq(first.cache(), via_target.cache()));
    assert!(registry::close(&path).unwrap());
    assert!(!registry::is_registered(dir.path().join("real/sub/p.prefs")).unwrap());
}
