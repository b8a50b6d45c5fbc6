use std::time::Duration;
use tree_prefs::{registry, FlushPolicy, Format, LockPolicy, Preferences, StoreConfig};

fn main() -> Result<(), tree_prefs::Error> {
    // flush everything still pending when main returns
    let _flush = registry::shutdown_guard();

    let home = std::env::temp_dir().join("tree_prefs_example_home");
    let config = StoreConfig::from_env()?
        .home(&home)
        .lock(LockPolicy::Timeout(Duration::from_secs(2)))
        .flush(FlushPolicy::Async(Duration::from_secs(5)))
        .format(Format::Json { pretty: true });

    let user = Preferences::user_root(&config)?;
    user.node("editor")?.put("font", "monospace")?;
    user.node("editor")?.put_i32("size", 14)?;
    user.flush()?;

    let path = config.user_store_path().expect("home is configured");
    println!("On-disk JSON:\n{}", std::fs::read_to_string(&path)?);
    println!("\nDebug output: {user:?}");

    let _ = std::fs::remove_dir_all(&home);
    Ok(())
}
