//! Host-directory mounting.
//!
//! Copies a directory tree from the real filesystem into the virtual one
//! before execution. This is the same seam the dependency installer and
//! editor collaborators use; the CLI just happens to populate it from
//! disk.

use std::path::Path;

use anyhow::Context;

use nodekit_vfs::{path as vpath, MemFs};

/// Recursively copy `host_dir` into the VFS at `virtual_dir`.
pub fn mount_directory(fs: &MemFs, host_dir: &Path, virtual_dir: &str) -> anyhow::Result<()> {
    fs.create_dir_all(virtual_dir)
        .with_context(|| format!("cannot create {}", virtual_dir))?;

    let entries = std::fs::read_dir(host_dir)
        .with_context(|| format!("cannot read {}", host_dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let target = vpath::join(virtual_dir, &name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            mount_directory(fs, &entry.path(), &target)?;
        } else if file_type.is_file() {
            let data = std::fs::read(entry.path())
                .with_context(|| format!("cannot read {}", entry.path().display()))?;
            fs.write_file(&target, data)
                .with_context(|| format!("cannot write {}", target))?;
        }
        // Symlinks and special files are skipped; the sandbox has no
        // representation for them.
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mounts_nested_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.js"), "console.log('hi');").unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/util.js"), "module.exports = 1;").unwrap();

        let fs = MemFs::new();
        mount_directory(&fs, dir.path(), "/").unwrap();

        assert_eq!(fs.read_to_string("/main.js").unwrap(), "console.log('hi');");
        assert_eq!(fs.read_to_string("/lib/util.js").unwrap(), "module.exports = 1;");
        assert_eq!(fs.read_dir("/lib").unwrap(), vec!["util.js"]);
    }
}
