//! Layered configuration for symdex.
//!
//! Sources are merged in this order, later ones winning:
//! built-in defaults, the user file (`<config dir>/symdex/config.toml`), an
//! explicit file or `./symdex.toml`, and `SYMDEX__SECTION__KEY` environment
//! variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the project-local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "symdex.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SYMDEX";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to write configuration to {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheSettings,
    pub search: SearchSettings,
    pub updater: UpdaterSettings,
    pub collector: CollectorSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub eviction_ratio: f64,
    pub default_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Directory for the durable tier; unset keeps the cache in memory.
    pub disk_dir: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            eviction_ratio: 0.2,
            default_ttl_secs: 3600,
            cleanup_interval_secs: 60,
            disk_dir: None,
        }
    }
}

impl CacheSettings {
    /// `disk_dir` with `~` and environment variables expanded.
    pub fn disk_dir_path(&self) -> Option<PathBuf> {
        self.disk_dir.as_deref().map(expand_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub max_results: usize,
    pub case_sensitive: bool,
    /// One of `relevance`, `name`, `location`, `kind`, `project`.
    pub sort: String,
    pub prefix: bool,
    pub fuzzy: bool,
    pub regex: bool,
    pub min_score: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_results: 100,
            case_sensitive: false,
            sort: "relevance".to_string(),
            prefix: true,
            fuzzy: true,
            regex: true,
            min_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterSettings {
    pub debounce_ms: u64,
    pub shutdown_grace_secs: u64,
    pub scan_for_new_files: bool,
    /// Quiet period the file watcher waits per path.
    pub watch_debounce_ms: u64,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            shutdown_grace_secs: 5,
            scan_for_new_files: false,
            watch_debounce_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// Extensions of the per-file symbol dumps read by the CLI, without the
    /// dot.
    pub extensions: Vec<String>,
    /// Worker threads for collection; unset uses the global rayon pool.
    pub parallelism: Option<usize>,
    pub respect_gitignore: bool,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            extensions: vec!["json".to_string()],
            parallelism: None,
            respect_gitignore: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources. `explicit` replaces the
    /// `./symdex.toml` lookup and must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(Self::user_config_path().as_deref(), explicit, None)
    }

    /// Path of the per-user configuration file, if a config dir is known.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("symdex").join("config.toml"))
    }

    /// Merge the given sources. `env` overrides the process environment,
    /// mainly for tests.
    fn load_from(
        user: Option<&Path>,
        explicit: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(user) = user {
            builder = builder.add_source(File::from(user).format(FileFormat::Toml).required(false));
        }
        builder = match explicit {
            Some(path) => builder.add_source(File::from(path).format(FileFormat::Toml).required(true)),
            None => builder.add_source(
                File::from(Path::new(LOCAL_CONFIG_FILE))
                    .format(FileFormat::Toml)
                    .required(false),
            ),
        };
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("collector.extensions")
                .source(env),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Write this configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(io_err)
    }
}

/// Expand `~` and `$VAR` references in a configured path.
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.search.sort, "relevance");
        assert_eq!(config.updater.debounce_ms, 500);
        assert_eq!(config.collector.extensions, vec!["json"]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_files_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("absent.toml");
        let config = Config::load_from(Some(&user), None, Some(HashMap::new())).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_explicit_file_overrides_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        let explicit = dir.path().join("explicit.toml");
        std::fs::write(&user, "[cache]\nmax_entries = 10\n[search]\nmax_results = 5\n").unwrap();
        std::fs::write(&explicit, "[search]\nmax_results = 7\nsort = \"name\"\n").unwrap();

        let config = Config::load_from(Some(&user), Some(&explicit), Some(HashMap::new())).unwrap();
        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.search.max_results, 7);
        assert_eq!(config.search.sort, "name");
        assert!(config.search.fuzzy);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("nope.toml");
        let result = Config::load_from(None, Some(&explicit), Some(HashMap::new()));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<String, String> = [
            ("SYMDEX__CACHE__MAX_ENTRIES", "42"),
            ("SYMDEX__UPDATER__SCAN_FOR_NEW_FILES", "true"),
            ("SYMDEX__LOGGING__LEVEL", "debug"),
            ("SYMDEX__COLLECTOR__EXTENSIONS", "cs,vb"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = Config::load_from(None, None, Some(env)).unwrap();
        assert_eq!(config.cache.max_entries, 42);
        assert!(config.updater.scan_for_new_files);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.collector.extensions, vec!["cs", "vb"]);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("symdex.toml");
        let mut config = Config::default();
        config.cache.disk_dir = Some("~/.cache/symdex".to_string());
        config.search.min_score = 0.5;
        config.save(&path).unwrap();

        let loaded = Config::load_from(None, Some(&path), Some(HashMap::new())).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_expand_path() {
        let expanded = expand_path("~/cache");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_path("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
