use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Sibling temp path for `path`, unique within this process.
fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new("."));
    let file = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    parent.join(format!(".{file}.{}.{seq}.tmp", std::process::id()))
}

/// Write `bytes` to `path`, creating parent directories first.
///
/// The bytes land in a sibling temp file which is then renamed over the
/// destination, so readers see either no file or the complete one. Writing
/// the same content to the same path again is harmless.
///
/// # Errors
/// Returns an error if the directories, the temp file, or the rename fail.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path_for(path);
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        // Windows refuses to rename over an existing file.
        if cfg!(windows) && path.exists() {
            let copied = fs::copy(&temp_path, path).map(|_| ());
            let _ = fs::remove_file(&temp_path);
            return copied;
        }
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}
