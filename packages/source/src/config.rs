//! Dashboard configuration.
//!
//! The default configuration is embedded at compile time from
//! `config/default.toml`. A user file only needs the keys it changes: it
//! is merged over the defaults table by table. A few environment variables
//! override the result last.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::SourceError;
use crate::population::PopulationFormat;

/// Embedded default configuration.
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Environment variable overriding [`DashboardConfig::data_dir`].
pub const ENV_DATA_DIR: &str = "CRIME_FR_DATA_DIR";
/// Environment variable naming a configuration file to load.
pub const ENV_CONFIG: &str = "CRIME_FR_CONFIG";
/// Environment variable overriding [`PipelineConfig::max_rows`].
pub const ENV_MAX_ROWS: &str = "CRIME_FR_MAX_ROWS";
/// Environment variable overriding
/// [`PopulationSourceConfig::extrapolate_until`]. `none` disables it.
pub const ENV_EXTRAPOLATE_UNTIL: &str = "CRIME_FR_EXTRAPOLATE_UNTIL";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Directory all source file names are relative to.
    pub data_dir: PathBuf,
    /// Crime source settings.
    pub crime: CrimeSourceConfig,
    /// Commune reference settings.
    pub communes: CommuneSourceConfig,
    /// Population source settings.
    pub population: PopulationSourceConfig,
    /// Pipeline limits.
    pub pipeline: PipelineConfig,
    /// Refresh utility settings.
    pub refresh: RefreshConfig,
}

/// Crime source settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrimeSourceConfig {
    /// Candidate file names, tried in order.
    pub candidates: Vec<String>,
}

/// Commune reference settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommuneSourceConfig {
    /// Reference file name.
    pub file: String,
}

/// Population source settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationSourceConfig {
    /// File layout.
    pub format: PopulationFormat,
    /// File name.
    pub file: String,
    /// Last year to fill by carrying the final measured year forward
    /// (wide layout only).
    #[serde(default)]
    pub extrapolate_until: Option<i32>,
}

/// Pipeline limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Largest table handed to the presentation layer.
    pub max_rows: usize,
    /// Number of prepared tables kept in memory.
    pub memo_capacity: usize,
}

/// Refresh utility settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Stable download URL of the national crime export.
    pub url: String,
    /// File name written under `data_dir`.
    pub output: String,
    /// Download attempts before giving up.
    pub max_attempts: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl DashboardConfig {
    /// Parses the embedded default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] if the embedded TOML is malformed.
    pub fn embedded() -> Result<Self, SourceError> {
        Ok(toml::from_str(DEFAULT_CONFIG)?)
    }

    /// Parses `overlay` merged over the embedded defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] if either document is malformed or
    /// the merged result does not describe a complete configuration.
    pub fn from_toml_str(overlay: &str) -> Result<Self, SourceError> {
        let mut base: toml::Table = toml::from_str(DEFAULT_CONFIG)?;
        let overlay: toml::Table = toml::from_str(overlay)?;
        merge_tables(&mut base, overlay);
        Ok(toml::Value::Table(base).try_into()?)
    }

    /// Loads the configuration: embedded defaults, then `path` if given,
    /// then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, SourceError> {
        let mut config = match path {
            Some(path) => {
                log::info!("Loading config from {}", path.display());
                Self::from_toml_str(&std::fs::read_to_string(path)?)?
            }
            None => Self::embedded()?,
        };
        config.apply_env();
        Ok(config)
    }

    /// Applies `CRIME_FR_*` environment overrides. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(raw) = std::env::var(ENV_MAX_ROWS) {
            match raw.parse() {
                Ok(max) => self.pipeline.max_rows = max,
                Err(e) => log::warn!("Ignoring {ENV_MAX_ROWS}={raw}: {e}"),
            }
        }
        if let Ok(raw) = std::env::var(ENV_EXTRAPOLATE_UNTIL) {
            if raw.eq_ignore_ascii_case("none") {
                self.population.extrapolate_until = None;
            } else {
                match raw.parse() {
                    Ok(year) => self.population.extrapolate_until = Some(year),
                    Err(e) => log::warn!("Ignoring {ENV_EXTRAPOLATE_UNTIL}={raw}: {e}"),
                }
            }
        }
    }

    /// Crime candidate paths, in priority order.
    #[must_use]
    pub fn crime_candidates(&self) -> Vec<PathBuf> {
        self.crime
            .candidates
            .iter()
            .map(|name| self.data_dir.join(name))
            .collect()
    }

    /// Commune reference path.
    #[must_use]
    pub fn communes_path(&self) -> PathBuf {
        self.data_dir.join(&self.communes.file)
    }

    /// Population source path.
    #[must_use]
    pub fn population_path(&self) -> PathBuf {
        self.data_dir.join(&self.population.file)
    }

    /// Path the refresh utility writes to.
    #[must_use]
    pub fn refresh_output_path(&self) -> PathBuf {
        self.data_dir.join(&self.refresh.output)
    }
}

/// Recursively merges `overlay` into `base`; tables merge, everything else
/// replaces.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
