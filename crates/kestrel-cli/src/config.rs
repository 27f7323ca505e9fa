//! CLI configuration management.

use crate::commands::ExecSettings;
use kestrel_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pipeline file used when none is given.
pub const DEFAULT_FILE: &str = ".kestrel.yml";

/// Defaults read from the user's configuration file.
///
/// List entries are prepended to the corresponding command-line lists, so
/// command-line values take effect last.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Volumes mounted into every step.
    #[serde(default)]
    pub volumes: Vec<String>,
    /// External networks every step joins.
    #[serde(default)]
    pub networks: Vec<String>,
    /// Additional plugin images allowed to run privileged.
    #[serde(default)]
    pub privileged: Vec<String>,
    /// Environment overrides as `KEY=value`.
    #[serde(default)]
    pub env: Vec<String>,
}

impl CliConfig {
    /// Load configuration from the platform config directory, if present.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Get the configuration file path.
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "kestrel", "kestrel")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Merge the file defaults into command-line settings.
    pub fn apply(&self, settings: &mut ExecSettings) {
        prepend(&mut settings.volumes, &self.volumes);
        prepend(&mut settings.networks, &self.networks);
        prepend(&mut settings.privileged, &self.privileged);
        prepend(&mut settings.env, &self.env);
    }
}

fn prepend(target: &mut Vec<String>, defaults: &[String]) {
    if defaults.is_empty() {
        return;
    }
    let mut merged = defaults.to_vec();
    merged.append(target);
    *target = merged;
}
