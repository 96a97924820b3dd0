pub mod model;
pub mod resolve;
pub mod validate;

use std::path::{Path, PathBuf};

use model::PortrigConfig;

pub const CONFIG_FILENAME: &str = "portrig.toml";

/// Read and parse a config file. Returns the parsed config together with the
/// raw source so validation can point at the offending lines.
pub fn load_config(path: &Path) -> anyhow::Result<(PortrigConfig, String)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: PortrigConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
    Ok((config, content))
}

/// Resolve a service `path` relative to the directory holding the config file.
/// `~` and `$HOME` prefixes are expanded first.
pub fn resolve_service_dir(config_dir: &Path, path: Option<&str>) -> PathBuf {
    match path {
        None => config_dir.to_path_buf(),
        Some(p) => {
            let expanded = crate::platform::expand_home(p);
            let candidate = PathBuf::from(expanded);
            if candidate.is_absolute() {
                candidate
            } else {
                config_dir.join(candidate)
            }
        }
    }
}
