use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use release_builder::config::CONFIG_FILE;

/// `RELEASE_BUILDER_ROOT`, else the nearest ancestor of the working
/// directory holding `release.toml` or a Cargo workspace, else the working
/// directory itself.
pub(crate) fn locate_repo_root() -> Result<PathBuf> {
    if let Some(root) = std::env::var_os("RELEASE_BUILDER_ROOT") {
        return Ok(PathBuf::from(root));
    }
    let cwd = std::env::current_dir().context("resolving current directory")?;
    Ok(find_root_from(&cwd).unwrap_or(cwd))
}

fn find_root_from(start: &Path) -> Option<PathBuf> {
    if let Some(dir) = start.ancestors().find(|d| d.join(CONFIG_FILE).is_file()) {
        return Some(dir.to_path_buf());
    }
    start
        .ancestors()
        .find(|d| is_workspace_root(&d.join("Cargo.toml")))
        .map(Path::to_path_buf)
}

fn is_workspace_root(manifest: &Path) -> bool {
    std::fs::read_to_string(manifest)
        .map(|text| text.lines().any(|l| l.trim() == "[workspace]"))
        .unwrap_or(false)
}
