//! Side-effecting adapters: filesystem, git, containers, child processes.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub mod backlog;
pub mod config;
pub mod containers;
pub mod env_file;
pub mod git;
pub mod init;
pub mod lock;
pub mod paths;
pub mod process;
pub mod stack;
pub mod store;
pub mod workspace;

/// Write `contents` to a sibling temp file, then rename over `path`.
///
/// Readers see either the old or the new file, never a partial write. The
/// temp name carries the pid so a preempted writer cannot clobber another
/// writer's temp file.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_string_lossy();
    let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, std::process::id()));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_and_leaves_no_temp() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("board.json");
        write_atomic(&path, "one\n").expect("write");
        write_atomic(&path, "two\n").expect("rewrite");
        assert_eq!(fs::read_to_string(&path).expect("read"), "two\n");
        let entries: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
