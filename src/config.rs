use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Selectable "new books" windows, in days. `LibraryConfig::new_books_period`
/// indexes into this table; the chosen value is persisted next to the
/// `new_books` statistic.
pub const NEW_BOOKS_PERIODS: [u32; 7] = [7, 14, 21, 30, 44, 60, 90];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub library: LibraryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub covers: CoversConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    /// Root directory under which relative book filenames are resolved.
    pub library_path: PathBuf,
    /// 0 = Latin-first collation, >0 = Cyrillic-first.
    #[serde(default)]
    pub sort_order: u32,
    /// Index into `NEW_BOOKS_PERIODS`.
    #[serde(default = "default_new_books_period")]
    pub new_books_period: usize,
    /// Apply author alias substitution on insert.
    #[serde(default = "default_true")]
    pub use_authors_aliases: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

/// Cover cache policy. Consumed by the cover-cache collaborator; carried
/// here because the library facade advertises these options.
#[derive(Debug, Clone, Deserialize)]
pub struct CoversConfig {
    #[serde(default)]
    pub cache_images_in_memory: bool,
    #[serde(default = "default_max_ram_image_cache_mb")]
    pub max_ram_image_cache_size_mb: u64,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(config)
    }

    /// The active "new books" window in days. Out-of-range indices fall back
    /// to the default period.
    pub fn new_books_days(&self) -> u32 {
        NEW_BOOKS_PERIODS
            .get(self.library.new_books_period)
            .copied()
            .unwrap_or(NEW_BOOKS_PERIODS[default_new_books_period()])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

// Default value functions

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_new_books_period() -> usize {
    3 // 30 days
}

fn default_db_path() -> String {
    "books.sqlite".to_string()
}

fn default_max_ram_image_cache_mb() -> u64 {
    64
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for CoversConfig {
    fn default() -> Self {
        Self {
            cache_images_in_memory: false,
            max_ram_image_cache_size_mb: default_max_ram_image_cache_mb(),
        }
    }
}
