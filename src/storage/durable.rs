//! Durable atomic file replacement.
//!
//! Replaces the contents of a target path without ever exposing a
//! partial state: the payload is written to a sibling temporary file,
//! fsynced, and renamed over the target. Rename is atomic on POSIX
//! filesystems, so a crash leaves either the old file or the new one.

use crate::error::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Atomically replace the file at `path` with `data`.
///
/// On any error the temporary file is removed and the target is left
/// untouched.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = temp_sibling(path);

    let result = write_and_sync(&tmp, data);
    if let Err(err) = result {
        // Best effort: the temporary is garbage either way.
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }

    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

fn write_and_sync(tmp: &Path, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

/// Build a sibling temporary name with a random suffix so concurrent
/// writers to different targets in the same directory cannot collide.
fn temp_sibling(path: &Path) -> PathBuf {
    let suffix: u64 = rand::random();
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".tmp.{:016x}", suffix));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_new_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        write_atomic(&path, b"hello")?;
        assert_eq!(fs::read(&path)?, b"hello");
        Ok(())
    }

    #[test]
    fn test_replace_existing_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        write_atomic(&path, b"old contents")?;
        write_atomic(&path, b"new")?;
        assert_eq!(fs::read(&path)?, b"new");
        Ok(())
    }

    #[test]
    fn test_no_temporaries_left_behind() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        write_atomic(&path, b"payload")?;

        let entries: Vec<_> = fs::read_dir(dir.path())?
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("data.bin")]);
        Ok(())
    }

    #[test]
    fn test_failure_leaves_target_untouched() {
        let dir = tempdir().unwrap();
        // Target inside a directory that does not exist.
        let path = dir.path().join("missing").join("data.bin");

        assert!(write_atomic(&path, b"payload").is_err());
        assert!(!path.exists());
    }
}
