//! Configuration loading and constants.
//!
//! Loads application configuration from TOML files and defines defaults for
//! the startup connectivity test, the request monitor, logging format, and
//! default paths. `AppConfig` is the root configuration struct containing all settings.

use const_format::formatcp;
use serde::Deserialize;
use std::path::Path;

// =============================================================================
// Startup Connectivity Test Defaults
// =============================================================================
// The test query runs once before the HTTP listener is bound. A missing row,
// a mismatching value, or a query failure aborts startup.

/// Query issued against the database during initialization
pub const DEFAULT_TEST_QUERY: &str = "SELECT 1 AS Result;";

/// Column read from the first row returned by the test query
pub const DEFAULT_TEST_COLUMN: &str = "Result";

/// Value the test column must hold for the check to pass
pub const DEFAULT_TEST_VALUE: &str = "1";

// =============================================================================
// Database Constants
// =============================================================================

/// Default size of the shared connection pool
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

// =============================================================================
// Monitor Constants
// =============================================================================

/// Number of finished samples kept for the health report
pub const DEFAULT_RECENT_SAMPLES: usize = 100;

/// Clock ticks per second used by /proc/<pid>/task/<tid>/stat on Linux
pub const PROC_CLOCK_TICKS_PER_SEC: u64 = 100;

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Name of this crate, used as the log target prefix
pub const CRATE_NAME: &str = "sentinel";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = formatcp!("{}=debug,tower_http=info,sqlx=warn", CRATE_NAME);

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration
    pub http: HttpServerConfig,
    /// Database connection settings
    pub database: DatabaseConfig,
    /// Startup connectivity test
    #[serde(rename = "Initialization", default)]
    pub initialization: InitializationConfig,
    /// Request monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    pub url: String,
    /// When false, no connections are made and the startup test is skipped
    #[serde(default = "DatabaseConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_max_connections() -> u32 {
        DEFAULT_MAX_CONNECTIONS
    }
}

/// Startup connectivity test settings, read from the `[Initialization]` table.
///
/// Keys keep their `TestQuery`/`TestColumn`/`TestValue` spelling so existing
/// deployment files carry over unchanged.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct InitializationConfig {
    #[serde(default = "InitializationConfig::default_test_query")]
    pub test_query: String,
    #[serde(default = "InitializationConfig::default_test_column")]
    pub test_column: String,
    #[serde(default = "InitializationConfig::default_test_value")]
    pub test_value: String,
}

impl Default for InitializationConfig {
    fn default() -> Self {
        Self {
            test_query: Self::default_test_query(),
            test_column: Self::default_test_column(),
            test_value: Self::default_test_value(),
        }
    }
}

impl InitializationConfig {
    fn default_test_query() -> String {
        DEFAULT_TEST_QUERY.to_string()
    }

    fn default_test_column() -> String {
        DEFAULT_TEST_COLUMN.to_string()
    }

    fn default_test_value() -> String {
        DEFAULT_TEST_VALUE.to_string()
    }
}

/// Request monitor settings
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Master switch checked at every sampler entry point
    #[serde(default = "MonitorConfig::default_enabled")]
    pub enabled: bool,
    /// How many finished samples the health report keeps
    #[serde(default = "MonitorConfig::default_recent_samples")]
    pub recent_samples: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            recent_samples: Self::default_recent_samples(),
        }
    }
}

impl MonitorConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_recent_samples() -> usize {
        DEFAULT_RECENT_SAMPLES
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;

        if config.database.enabled && config.database.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database.url must be set when the database is enabled".to_string(),
            ));
        }

        if !matches!(config.logging.format.to_ascii_lowercase().as_str(), "text" | "json") {
            return Err(ConfigError::Validation(format!(
                "Unknown logging.format '{}', expected \"text\" or \"json\"",
                config.logging.format
            )));
        }

        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
