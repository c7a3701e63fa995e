//! Standard locations for rouse configuration

use std::path::PathBuf;

/// Directory holding rouse configuration
///
/// Returns: `~/.config/rouse` (platform config dir), or `./rouse` when no
/// home directory can be resolved.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rouse")
}

/// Default config file path
///
/// Returns: `~/.config/rouse/config.yaml`
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.yaml")
}
