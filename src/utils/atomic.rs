//! Atomic file operations
//!
//! Whole-file writes (the clock tick log) go through a temp file:
//!
//! 1. Write to `<path>.tmp`
//! 2. `sync_all()` to flush to disk
//! 3. Rename over the final path
//!
//! A reader therefore sees either the previous file or the new one, never a
//! partial write. Append-only JSONL files do not use this path.

use std::fs::{self, File};
use std::io;
use std::path::Path;

/// Atomically replace `path` with whatever `write_fn` writes
///
/// ```ignore
/// atomic_write_with("data/clock_ticks.json", |file| {
///     serde_json::to_writer_pretty(&mut *file, &log)?;
///     Ok(())
/// })?;
/// ```
pub fn atomic_write_with<P, F>(path: P, write_fn: F) -> io::Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = File::create(&temp_path)?;
    write_fn(&mut file)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
}

/// Remove `.tmp` files left behind by an interrupted write
///
/// Returns the number of files removed.
pub fn cleanup_temp_files<P: AsRef<Path>>(dir: P) -> io::Result<usize> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(0);
    }

    let mut cleaned = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "tmp") {
            fs::remove_file(&path)?;
            cleaned += 1;
        }
    }

    Ok(cleaned)
}
