//! Configuration for advanced filters.
//!
//! AFILTER_ROOT resolution order:
//! 1. Explicit path passed to Config::with_root()
//! 2. AFILTER_ROOT environment variable
//! 3. Default: ~/.local/share/afilter

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::query::TimestampBounds;
use crate::{Error, Result};

/// Advanced filters configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for the filter database and schema file.
    pub root: PathBuf,

    /// Base64-encode queries used as transport parameters.
    #[serde(default = "default_base64")]
    pub base64: bool,

    /// POSIX timestamp substituted for an open lower range bound.
    #[serde(default = "default_min_timestamp")]
    pub min_timestamp: i64,

    /// POSIX timestamp substituted for an open upper range bound.
    #[serde(default = "default_max_timestamp")]
    pub max_timestamp: i64,

    /// Distinct-value choice lists at or above this size are dropped.
    #[serde(default = "default_max_choices")]
    pub max_choices: usize,

    /// Field names for which choice lookups are never computed.
    #[serde(default)]
    pub disabled_fields: Vec<String>,

    /// Only owners (and superusers) may edit a stored filter.
    #[serde(default = "default_edit_by_user_only")]
    pub edit_by_user_only: bool,
}

fn default_base64() -> bool {
    true
}

fn default_min_timestamp() -> i64 {
    TimestampBounds::DEFAULT_MIN
}

fn default_max_timestamp() -> i64 {
    TimestampBounds::DEFAULT_MAX
}

fn default_max_choices() -> usize {
    254
}

fn default_edit_by_user_only() -> bool {
    true
}

impl Config {
    /// Create a new config with the given root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base64: default_base64(),
            min_timestamp: default_min_timestamp(),
            max_timestamp: default_max_timestamp(),
            max_choices: default_max_choices(),
            disabled_fields: Vec::new(),
            edit_by_user_only: default_edit_by_user_only(),
        }
    }

    /// Create a config using default root resolution.
    pub fn default_location() -> Result<Self> {
        let root = resolve_root()?;
        Ok(Self::with_root(root))
    }

    /// Load config from AFILTER_ROOT/config.toml, or create default.
    pub fn load() -> Result<Self> {
        let root = resolve_root()?;
        Self::load_from(&root)
    }

    /// Load config from a specific root.
    pub fn load_from(root: &Path) -> Result<Self> {
        let config_path = root.join("config.toml");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            let mut config: Config = toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
            // Ensure root matches the actual location
            config.root = root.to_path_buf();
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::with_root(root))
        }
    }

    /// Save config to AFILTER_ROOT/config.toml.
    pub fn save(&self) -> Result<()> {
        let config_path = self.root.join("config.toml");
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(config_path, contents)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.min_timestamp >= self.max_timestamp {
            return Err(Error::Config(format!(
                "min_timestamp ({}) must be lower than max_timestamp ({})",
                self.min_timestamp, self.max_timestamp
            )));
        }
        Ok(())
    }

    /// Range bounds used when decoding open-ended ranges.
    pub fn timestamp_bounds(&self) -> TimestampBounds {
        TimestampBounds::new(self.min_timestamp, self.max_timestamp)
    }

    // Path helpers

    /// Path to the DuckDB database file.
    pub fn db_path(&self) -> PathBuf {
        self.root.join("db/filters.duckdb")
    }

    /// Path to the model schema description (TOML).
    pub fn schema_path(&self) -> PathBuf {
        self.root.join("schema.toml")
    }
}

/// Resolve AFILTER_ROOT using the standard resolution order.
fn resolve_root() -> Result<PathBuf> {
    // 1. Environment variable
    if let Ok(path) = std::env::var("AFILTER_ROOT") {
        return Ok(PathBuf::from(path));
    }

    // 2. XDG data directory (via directories crate)
    if let Some(proj_dirs) = ProjectDirs::from("", "", "afilter") {
        return Ok(proj_dirs.data_dir().to_path_buf());
    }

    // 3. Fallback to ~/.local/share/afilter
    let home = std::env::var("HOME")
        .map_err(|_| Error::Config("Could not determine home directory".to_string()))?;
    Ok(PathBuf::from(home).join(".local/share/afilter"))
}
