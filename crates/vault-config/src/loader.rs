//! Multi-source configuration merging.

use std::path::PathBuf;

use crate::{ConfigError, Paths, VaultConfig};

/// Configuration loader with a builder pattern: sources are added
/// lowest-to-highest precedence and later sources override earlier ones.
pub struct ConfigLoader {
    explicit_path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { explicit_path: None, env_prefix: "VAULTD".to_string() }
    }

    /// Adds an explicit config file as the highest-precedence source.
    pub fn with_explicit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_path = Some(path.into());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Loads configuration from all sources with proper precedence:
    /// defaults < XDG user config < env vars < explicit path.
    pub fn load(self) -> Result<VaultConfig, ConfigError> {
        let mut builder = config::Config::builder();

        let defaults = VaultConfig::default();
        builder = builder.add_source(
            config::Config::try_from(&defaults)
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?,
        );

        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file).required(false).format(config::FileFormat::Toml),
                );
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix).separator("_").try_parsing(true),
        );

        if let Some(path) = &self.explicit_path {
            builder = builder.add_source(
                config::File::from(path.clone()).required(true).format(config::FileFormat::Toml),
            );
        }

        let built = builder.build().map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        let config: VaultConfig =
            built.try_deserialize().map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration, or falls back to built-in defaults on any error.
    pub fn load_or_default(self) -> VaultConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
