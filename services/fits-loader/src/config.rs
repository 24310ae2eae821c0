//! Configuration loader for fits-loader.
//!
//! Loads and validates a YAML configuration file with database settings,
//! logging settings and the loader mode flags.
//!
//! Supports environment variable substitution using ${VAR} syntax.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ingestion::ReconcileOptions;
use storage::PgGatewayOptions;

/// Environment variable that replaces the `database` section with a URL.
pub const DATABASE_URL_ENV: &str = "FITS_DATABASE_URL";

// ============================================================================
// Loader Configuration (fits-loader.yaml)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub loader: LoaderFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    /// Send logs to the system journal instead of stdout
    #[serde(default)]
    pub syslog: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            syslog: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderFlags {
    #[serde(default)]
    pub offline_validation: bool,
    #[serde(default)]
    pub resync_mode: bool,
    #[serde(default)]
    pub dry_run: bool,
    /// Directory of unit files, if not given on the command line
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub site_file: Option<PathBuf>,
}

fn default_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_connection_timeout_secs() -> u64 {
    30
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let ssl_mode = match self.ssl_mode.as_str() {
            "disable" => PgSslMode::Disable,
            "prefer" => PgSslMode::Prefer,
            "require" => PgSslMode::Require,
            other => anyhow::bail!("Invalid ssl_mode: {}", other),
        };

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .ssl_mode(ssl_mode);

        if !self.password.is_empty() {
            options = options.password(&self.password);
        }

        Ok(options)
    }

    pub fn pool_options(&self) -> PgGatewayOptions {
        PgGatewayOptions {
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_secs(self.connection_timeout_secs),
        }
    }
}

impl LoaderFlags {
    /// Fails unless there is a site file or a data directory to load.
    pub fn check_inputs(&self) -> Result<()> {
        anyhow::ensure!(
            self.site_file.is_some() || self.data_dir.is_some(),
            "Nothing to load: pass --data-dir or --site-file, or set loader.data_dir or loader.site_file"
        );
        Ok(())
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            offline_validation: self.offline_validation,
            resync: self.resync_mode,
            dry_run: self.dry_run,
        }
    }
}

// ============================================================================
// Loading Functions
// ============================================================================

/// Load and parse the loader config with environment variable substitution
pub fn load_loader_config<P: AsRef<Path>>(path: P) -> Result<LoaderConfig> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read loader config from {:?}", path.as_ref()))?;

    parse_loader_config(&content)
}

pub fn parse_loader_config(content: &str) -> Result<LoaderConfig> {
    let expanded = expand_env_vars(content)?;

    let config: LoaderConfig =
        serde_yaml::from_str(&expanded).with_context(|| "Failed to parse loader config YAML")?;

    validate_loader_config(&config)?;

    Ok(config)
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in YAML content
/// Supports ${VAR} and ${VAR:-default} syntax
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after
            .find('}')
            .with_context(|| format!("Unclosed variable substitution: ${{{}", after))?;

        result.push_str(&resolve_var_expr(&after[..end])?);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Resolve variable expression (supports VAR and VAR:-default syntax)
fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).with_context(|| format!("Environment variable {} not set", expr))
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_loader_config(config: &LoaderConfig) -> Result<()> {
    anyhow::ensure!(
        !config.database.host.is_empty(),
        "Database host cannot be empty"
    );
    anyhow::ensure!(
        config.database.port > 0,
        "Database port must be greater than 0"
    );
    anyhow::ensure!(
        !config.database.database.is_empty(),
        "Database name cannot be empty"
    );
    anyhow::ensure!(
        config.database.max_connections > 0,
        "Database max_connections must be greater than 0"
    );

    let valid_ssl_modes = ["disable", "prefer", "require"];
    anyhow::ensure!(
        valid_ssl_modes.contains(&config.database.ssl_mode.as_str()),
        "Invalid ssl_mode: {}. Must be one of: {:?}",
        config.database.ssl_mode,
        valid_ssl_modes
    );

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    anyhow::ensure!(
        valid_levels.contains(&config.logging.level.as_str()),
        "Invalid log level: {}. Must be one of: {:?}",
        config.logging.level,
        valid_levels
    );

    let valid_formats = ["json", "pretty"];
    anyhow::ensure!(
        valid_formats.contains(&config.logging.format.as_str()),
        "Invalid log format: {}. Must be one of: {:?}",
        config.logging.format,
        valid_formats
    );

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
