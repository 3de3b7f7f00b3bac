//! XDG directory discovery for the vault daemon.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::ConfigError;

/// XDG-compliant paths for `vaultd`.
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self { project_dirs: ProjectDirs::from("", "", "vaultd") }
    }

    /// `~/.config/vaultd/`
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| ConfigError::XdgError("failed to determine user config directory".to_string()))
    }

    /// `~/.local/share/vaultd/`, the default parent for persisted `KeyedDb`
    /// directories when no `--data-dir` is given.
    pub fn user_data_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.data_dir().to_path_buf())
            .ok_or_else(|| ConfigError::XdgError("failed to determine user data directory".to_string()))
    }

    /// `~/.config/vaultd/config.toml`
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// Default key-chain file path under a given data directory.
    pub fn key_chain_file(data_dir: impl AsRef<Path>) -> PathBuf {
        data_dir.as_ref().join("keys.chain")
    }

    /// Default bootstrap endpoint list path under a given data directory.
    pub fn bootstrap_file(data_dir: impl AsRef<Path>) -> PathBuf {
        data_dir.as_ref().join("bootstrap.toml")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_file_paths_are_rooted_under_the_data_dir() {
        let data_dir = PathBuf::from("/var/lib/vaultd");
        assert_eq!(Paths::key_chain_file(&data_dir), data_dir.join("keys.chain"));
        assert_eq!(Paths::bootstrap_file(&data_dir), data_dir.join("bootstrap.toml"));
    }

    #[test]
    fn xdg_paths_do_not_panic() {
        let paths = Paths::new();
        if let Ok(dir) = paths.user_config_dir() {
            assert!(dir.to_string_lossy().contains("vaultd"));
        }
    }
}
