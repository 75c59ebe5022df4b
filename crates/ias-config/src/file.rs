use std::path::{Path, PathBuf};

use anyhow::Context;
use directories::ProjectDirs;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::IasConfig;

const FILE_NAME: &str = "config.toml";

impl IasConfig {
    /// Default location of `config.toml` for the current platform.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let proj_dirs =
            ProjectDirs::from("", "", "ias").ok_or(ConfigError::ProjectDirectoriesUnavailable)?;
        Ok(proj_dirs.config_dir().join(FILE_NAME))
    }

    /// Reads and validates the file at `path`. A missing file yields the defaults.
    #[instrument(level = "debug")]
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .context("Failed to read config file")
            .map_err(|e| ConfigError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            error!("Failed to parse {}: {}", path.display(), e);
            ConfigError::ParseFailed {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Like [`load`](Self::load), but logs any failure and falls back to the defaults.
    pub async fn load_or_default(path: &Path) -> Self {
        match Self::load(path).await {
            Ok(config) => config,
            Err(e) => {
                warn!("Using default config: {}", e);
                Self::default()
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")
                .map_err(|e| ConfigError::WriteFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let toml = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        tokio::fs::write(path, toml)
            .await
            .context("Failed to write config file")
            .map_err(|e| ConfigError::WriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        info!("Saved config to {}", path.display());
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "Project directories are unavailable - this usually indicates an unsupported OS or missing home directory"
    )]
    ProjectDirectoriesUnavailable,

    #[error("Failed to read config file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[source] toml::ser::Error),

    #[error("Failed to write '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}
