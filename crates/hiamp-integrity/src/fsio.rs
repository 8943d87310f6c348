// SPDX-License-Identifier: MIT OR Apache-2.0
//! Crash-safe filesystem helpers shared by the HIAMP stores.
//!
//! Every on-disk mutation in this workspace goes through write-temp + rename;
//! directory creation is mkdir-p. Renames are atomic on POSIX filesystems, so
//! readers observe either the old file or the new one, never a torn write.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::IntegrityError;

fn io_err(path: &Path, source: std::io::Error) -> IntegrityError {
    IntegrityError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Create `dir` and all missing parents.
pub fn ensure_dir(dir: &Path) -> Result<(), IntegrityError> {
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))
}

/// Write `bytes` to `path` atomically via a sibling temp file and rename.
///
/// The parent directory is created if missing. The temp name embeds the
/// process id so concurrent writers within one HQ never collide.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IntegrityError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let tmp = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));
    {
        let mut f = fs::File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
        f.write_all(bytes).map_err(|e| io_err(&tmp, e))?;
        f.sync_all().map_err(|e| io_err(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_err(path, e)
    })
}

/// Recursively copy the tree at `src` into `dst` (created if missing).
///
/// Symlinks are skipped, matching the export walk.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<(), IntegrityError> {
    ensure_dir(dst)?;
    for rel in crate::list_files_recursive(src)? {
        let from = src.join(&rel);
        let to = dst.join(&rel);
        if let Some(parent) = to.parent() {
            ensure_dir(parent)?;
        }
        fs::copy(&from, &to).map_err(|e| io_err(&from, e))?;
    }
    Ok(())
}

/// Move the directory `src` to `dst` atomically when possible.
///
/// Falls back to copy + remove when the rename crosses filesystems.
pub fn move_dir(src: &Path, dst: &Path) -> Result<(), IntegrityError> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_tree(src, dst)?;
            fs::remove_dir_all(src).map_err(|e| io_err(src, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_creates_parents_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c.yaml");
        write_atomic(&target, b"k: v\n").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "k: v\n");
    }

    #[test]
    fn write_atomic_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");
        write_atomic(&target, b"one").unwrap();
        write_atomic(&target, b"two").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"two");
    }

    #[test]
    fn write_atomic_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        write_atomic(&dir.path().join("f"), b"x").unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["f"]);
    }

    #[test]
    fn copy_tree_preserves_structure() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("nested")).unwrap();
        fs::write(src.path().join("nested/x.md"), "x").unwrap();
        fs::write(src.path().join("top.md"), "t").unwrap();

        let dst = tempfile::tempdir().unwrap();
        copy_tree(src.path(), &dst.path().join("out")).unwrap();
        assert_eq!(
            fs::read_to_string(dst.path().join("out/nested/x.md")).unwrap(),
            "x"
        );
        assert_eq!(fs::read_to_string(dst.path().join("out/top.md")).unwrap(), "t");
    }

    #[test]
    fn move_dir_removes_the_source() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("f"), "data").unwrap();
        let dst = root.path().join("dst");
        move_dir(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(dst.join("f")).unwrap(), "data");
    }
}
