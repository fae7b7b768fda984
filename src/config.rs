/*!
 * Configuration support for the medrep library
 *
 * Settings are layered: built-in defaults, then a TOML file (the per-user
 * config path by default), then `MEDREP_*` environment variables. The query
 * core never reads configuration itself; callers pass the relevant values in.
 */

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::NaiveDate;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_HISTORY_CAPACITY, DEFAULT_RESULT_LIMIT};
use crate::{ExportFormat, MedrepError, Result};

/// Environment variable prefix, e.g. `MEDREP_DEFAULT_LIMIT=10`
pub const ENV_PREFIX: &str = "MEDREP";

/// Runtime configuration for the medrep library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedrepConfig {
    /// Limit applied to ungrouped answers that carry none
    #[serde(default = "default_limit")]
    pub default_limit: Option<usize>,

    /// Number of charts kept for follow-up questions
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Fixed "today" for recency computations (None = system date)
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,

    /// Whether to skip invalid records during loading
    #[serde(default)]
    pub skip_invalid_records: bool,

    /// Whether to range-check records during loading
    #[serde(default = "default_true")]
    pub validate_records: bool,

    /// Whether to build the id index when loading data
    #[serde(default = "default_true")]
    pub index_on_load: bool,

    /// Number of threads for parallel enrichment (None = use all available)
    #[serde(default)]
    pub parallel_threads: Option<usize>,

    /// Default export format
    #[serde(default)]
    pub default_export_format: ExportFormat,

    /// Extra city names the intent analyzer should recognize
    #[serde(default)]
    pub extra_cities: Vec<String>,

    /// Extra first names the intent analyzer should recognize
    #[serde(default)]
    pub extra_first_names: Vec<String>,

    /// Extra last names the intent analyzer should recognize
    #[serde(default)]
    pub extra_last_names: Vec<String>,
}

impl Default for MedrepConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            history_capacity: default_history_capacity(),
            reference_date: None,
            skip_invalid_records: false,
            validate_records: true,
            index_on_load: true,
            parallel_threads: None,
            default_export_format: ExportFormat::Json,
            extra_cities: Vec::new(),
            extra_first_names: Vec::new(),
            extra_last_names: Vec::new(),
        }
    }
}

// Default value functions for serde
fn default_limit() -> Option<usize> {
    Some(DEFAULT_RESULT_LIMIT)
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_true() -> bool {
    true
}

impl MedrepConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by environment variables
    ///
    /// Every field maps to `MEDREP_<FIELD>`, for example:
    /// - `MEDREP_DEFAULT_LIMIT`: number
    /// - `MEDREP_REFERENCE_DATE`: YYYY-MM-DD
    /// - `MEDREP_SKIP_INVALID_RECORDS`: "true" or "false"
    /// - `MEDREP_PARALLEL_THREADS`: number
    /// - `MEDREP_EXTRA_CITIES`: comma-separated list
    pub fn from_env() -> Result<Self> {
        Self::layered(None)
    }

    /// Load configuration from a TOML file, without any other layer
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MedrepError::file_not_found_with_suggestion(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents).map_err(|e| MedrepError::Configuration {
            message: format!("Failed to parse config file: {}", e),
            suggestion: Some("Check that the file is valid TOML format".to_string()),
        })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| MedrepError::Configuration {
            message: format!("Failed to serialize config: {}", e),
            suggestion: None,
        })?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/medrep/config.toml` on Linux
    /// or `%APPDATA%\medrep\config.toml` on Windows
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "medrep").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from defaults, the default file and the environment
    ///
    /// Priority order (last wins):
    /// 1. Built-in defaults
    /// 2. Default config file (if it exists)
    /// 3. Environment variables
    pub fn load() -> Result<Self> {
        Self::layered(Self::default_config_path().as_deref())
    }

    /// Same layering as [`MedrepConfig::load`] with an explicit file
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::layered(Some(path.as_ref()))
    }

    fn layered(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }
        let environment = Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("extra_cities")
            .with_list_parse_key("extra_first_names")
            .with_list_parse_key("extra_last_names");

        let config: Self = builder.add_source(environment).build()?.try_deserialize()?;
        Ok(config)
    }

    /// Create a configuration tuned for large portfolios
    pub fn performance() -> Self {
        Self {
            skip_invalid_records: true,
            validate_records: false,
            parallel_threads: None, // Use all available
            ..Self::default()
        }
    }

    /// Create a configuration that rejects anything suspicious
    pub fn safe() -> Self {
        Self {
            skip_invalid_records: false,
            validate_records: true,
            parallel_threads: Some(1), // Single-threaded for predictability
            ..Self::default()
        }
    }

    /// The date recency is measured against
    pub fn reference_date_or_today(&self) -> NaiveDate {
        self.reference_date.unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// Size rayon's global pool; a no-op without a thread count
    pub fn configure_thread_pool(&self) -> Result<()> {
        let Some(threads) = self.parallel_threads else {
            return Ok(());
        };
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| MedrepError::Configuration {
                message: format!("Failed to configure {} worker threads: {}", threads, e),
                suggestion: Some("Configure the thread pool once, before running any query".to_string()),
            })
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: RwLock<Option<MedrepConfig>> = RwLock::new(None);
}

/// Set the global configuration
pub fn set_global_config(config: MedrepConfig) {
    *GLOBAL_CONFIG.write().unwrap_or_else(PoisonError::into_inner) = Some(config);
}

/// Get the global configuration (or the layered default if not set)
pub fn global_config() -> MedrepConfig {
    let current = GLOBAL_CONFIG.read().unwrap_or_else(PoisonError::into_inner).clone();
    current.unwrap_or_else(|| MedrepConfig::load().unwrap_or_default())
}

/// Clear the global configuration
pub fn clear_global_config() {
    *GLOBAL_CONFIG.write().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Builder for customizing configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: MedrepConfig,
}

impl ConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default result limit
    pub fn default_limit(mut self, limit: Option<usize>) -> Self {
        self.config.default_limit = limit;
        self
    }

    /// Set the chart history capacity
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    /// Pin "today" to a fixed date
    pub fn reference_date(mut self, date: NaiveDate) -> Self {
        self.config.reference_date = Some(date);
        self
    }

    /// Set skip invalid records
    pub fn skip_invalid_records(mut self, skip: bool) -> Self {
        self.config.skip_invalid_records = skip;
        self
    }

    /// Set record validation
    pub fn validate_records(mut self, validate: bool) -> Self {
        self.config.validate_records = validate;
        self
    }

    /// Set index on load
    pub fn index_on_load(mut self, enabled: bool) -> Self {
        self.config.index_on_load = enabled;
        self
    }

    /// Set number of parallel threads
    pub fn parallel_threads(mut self, threads: Option<usize>) -> Self {
        self.config.parallel_threads = threads;
        self
    }

    /// Set the default export format
    pub fn default_export_format(mut self, format: ExportFormat) -> Self {
        self.config.default_export_format = format;
        self
    }

    /// Add a city the analyzer should recognize
    pub fn extra_city<S: Into<String>>(mut self, city: S) -> Self {
        self.config.extra_cities.push(city.into());
        self
    }

    /// Add a first name the analyzer should recognize
    pub fn extra_first_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.extra_first_names.push(name.into());
        self
    }

    /// Add a last name the analyzer should recognize
    pub fn extra_last_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.extra_last_names.push(name.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> MedrepConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = MedrepConfig::default();
        assert_eq!(config.default_limit, Some(DEFAULT_RESULT_LIMIT));
        assert_eq!(config.history_capacity, 5);
        assert!(config.validate_records);
        assert!(!config.skip_invalid_records);
        assert_eq!(config.default_export_format, ExportFormat::Json);
    }

    #[test]
    fn test_presets() {
        let fast = MedrepConfig::performance();
        assert!(fast.skip_invalid_records);
        assert!(!fast.validate_records);

        let strict = MedrepConfig::safe();
        assert!(strict.validate_records);
        assert_eq!(strict.parallel_threads, Some(1));
    }

    #[test]
    fn test_config_builder() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let config = ConfigBuilder::new()
            .default_limit(None)
            .history_capacity(3)
            .reference_date(date)
            .parallel_threads(Some(4))
            .skip_invalid_records(true)
            .extra_city("Bourg-en-Bresse")
            .build();

        assert_eq!(config.default_limit, None);
        assert_eq!(config.history_capacity, 3);
        assert_eq!(config.reference_date_or_today(), date);
        assert_eq!(config.parallel_threads, Some(4));
        assert!(config.skip_invalid_records);
        assert_eq!(config.extra_cities, vec!["Bourg-en-Bresse".to_string()]);
    }

    #[test]
    fn test_save_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = ConfigBuilder::new()
            .reference_date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
            .default_export_format(ExportFormat::Csv)
            .extra_last_name("Vercingetorix")
            .build();

        config.save(&path).unwrap();
        assert_eq!(MedrepConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "history_capacity = 9").unwrap();
        writeln!(file, "extra_cities = [\"Roanne\"]").unwrap();

        let config = MedrepConfig::load_from(file.path()).unwrap();
        assert_eq!(config.history_capacity, 9);
        assert_eq!(config.extra_cities, vec!["Roanne".to_string()]);
        assert_eq!(config.default_limit, Some(DEFAULT_RESULT_LIMIT));
    }

    #[test]
    fn test_invalid_toml_is_a_configuration_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "history_capacity = = 9").unwrap();
        let err = MedrepConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, MedrepError::Configuration { .. }));
    }

    #[test]
    fn test_global_config_roundtrip() {
        set_global_config(ConfigBuilder::new().history_capacity(2).build());
        assert_eq!(global_config().history_capacity, 2);
        clear_global_config();
    }
}
