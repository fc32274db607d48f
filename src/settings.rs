//! Settings loaded from `config.toml`

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::host::CommandRunner;

/// Errors that can occur while loading settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Logging defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    pub verbose: bool,
    pub json: bool,
}

/// How child processes are launched
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerSettings {
    pub working_directory: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub log: LogSettings,
    pub runner: RunnerSettings,
}

impl Settings {
    /// Default location: `<config dir>/ci-poll/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ci-poll").join("config.toml"))
    }

    /// Load settings.
    ///
    /// An explicit path must exist. Without one the default location is
    /// tried, and a missing file there yields the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_from(explicit, Self::default_path())
    }

    fn load_from(explicit: Option<&Path>, fallback: Option<PathBuf>) -> Result<Self, SettingsError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match fallback {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::parse(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Build a runner from the `[runner]` table
    pub fn runner(&self) -> CommandRunner {
        let mut runner = CommandRunner::new();
        if let Some(dir) = &self.runner.working_directory {
            runner = runner.with_working_directory(dir.clone());
        }
        for (key, value) in &self.runner.env {
            runner = runner.with_env(key.clone(), value.clone());
        }
        runner
    }
}
