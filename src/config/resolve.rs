use std::path::{Path, PathBuf};

use anyhow::Context;

use super::CONFIG_FILENAME;

/// Nearest `filename` in `start` or one of its ancestors.
pub fn find_config(start: &Path, filename: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(filename))
        .find(|candidate| candidate.is_file())
}

/// `-f FILE` when given (it must exist), otherwise the nearest
/// `portrig.toml` above the working directory.
pub fn resolve_config(cli_file: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = cli_file {
        if !path.is_file() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        return path
            .canonicalize()
            .with_context(|| format!("resolving {}", path.display()));
    }

    let cwd = std::env::current_dir()?;
    find_config(&cwd, CONFIG_FILENAME).ok_or_else(|| {
        anyhow::anyhow!(
            "No {} found in {} or any parent directory",
            CONFIG_FILENAME,
            cwd.display()
        )
    })
}
