use tree_prefs::Preferences;

fn main() -> Result<(), tree_prefs::Error> {
    let path = std::env::temp_dir().join("tree_prefs_example_basic.prefs");
    let root = Preferences::open(&path)?;

    // keys on the root and on nested nodes
    root.put("theme", "dark")?;
    let window = root.node("ui/window")?;
    window.put_i32("width", 1280)?;
    window.put_i32("height", 720)?;
    window.put_bool("maximized", false)?;

    println!("theme    = {}", root.get("theme", "light")?);
    println!("width    = {}", window.get_i32("width", 800)?);
    println!("missing  = {}", window.get_i32("depth", -1)?);
    println!("children = {:?}", root.children()?);
    println!("ui keys  = {:?}", root.child("ui")?.keys()?);

    // persist, then look at the file
    root.flush()?;
    println!("\nOn disk:\n{}", std::fs::read_to_string(&path)?);

    // drop a subtree and persist again
    root.child("ui")?.remove_node()?;
    root.flush()?;
    println!("after remove: children = {:?}", root.children()?);

    let _ = std::fs::remove_file(&path);
    Ok(())
}
