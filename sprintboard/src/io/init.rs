//! Scaffolding for `.sprintboard/` in a project root.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::io::config::{BoardConfig, write_config};
use crate::io::paths::BoardPaths;

const BOARD_GITIGNORE: &str = "board.lock/\n.*.tmp\n";

/// Options for `init_board_dir`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Overwrite an existing config with defaults.
    pub force: bool,
}

/// Create `.sprintboard/` with a default config if one is missing.
///
/// The board document itself is written by `BoardStore::initialize`, which
/// needs the lock.
pub fn init_board_dir(root: &Path, options: &InitOptions) -> Result<BoardPaths> {
    let paths = BoardPaths::new(root);
    if paths.board_dir.exists() && !paths.board_dir.is_dir() {
        return Err(anyhow!(
            "sprintboard init: .sprintboard exists but is not a directory"
        ));
    }
    fs::create_dir_all(&paths.board_dir)
        .with_context(|| format!("create {}", paths.board_dir.display()))?;

    let gitignore = paths.board_dir.join(".gitignore");
    if !gitignore.exists() {
        fs::write(&gitignore, BOARD_GITIGNORE)
            .with_context(|| format!("write {}", gitignore.display()))?;
    }
    if options.force || !paths.config_path.exists() {
        write_config(&paths.config_path, &BoardConfig::default())?;
        info!(path = %paths.config_path.display(), "default config written");
    }
    Ok(paths)
}
