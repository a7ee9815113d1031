//! Configuration handling.
//!
//! `DatabaseConfig` describes how to open a database handle. It can be
//! deserialized from JSON (both snake_case keys and the camelCase keys used by
//! existing deployment files are accepted) or assembled from CLI arguments
//! and environment variables through [`Cli`].

use crate::models::DatabaseType;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// How long an idle connection survives when `max_idle_conns` is 0.
pub const IDLE_RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Database connection configuration.
///
/// Immutable once handed to the connection factory. Optional pool limits,
/// when absent, leave the driver defaults untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Driver identifier: "sqlite", "postgres" or "mysql".
    #[serde(alias = "databaseDriver", alias = "driverName")]
    pub driver_name: String,
    /// Connection URL (sensitive - not logged).
    #[serde(alias = "datasourceName", alias = "dataSourceName")]
    pub data_source_name: String,
    /// Ceiling on idle connections.
    ///
    /// The pool never opens connections ahead of demand, so this is not a
    /// floor. sqlx has no idle-count ceiling: 0 releases idle connections
    /// after [`IDLE_RELEASE_TIMEOUT`], any other value keeps the driver's
    /// idle reaping and only bounds `max_open_conns` in validation.
    #[serde(default, alias = "maxIdleConns")]
    pub max_idle_conns: Option<u32>,
    /// Upper bound on open connections.
    #[serde(default, alias = "maxOpenConns")]
    pub max_open_conns: Option<u32>,
    /// Maximum lifetime of a pooled connection, in seconds.
    #[serde(default, alias = "maxConnLifetime", alias = "maxConnLifetimeSeconds")]
    pub max_conn_lifetime_secs: Option<u64>,
}

impl DatabaseConfig {
    /// Create a configuration without pool limits.
    pub fn new(driver_name: impl Into<String>, data_source_name: impl Into<String>) -> Self {
        Self {
            driver_name: driver_name.into(),
            data_source_name: data_source_name.into(),
            max_idle_conns: None,
            max_open_conns: None,
            max_conn_lifetime_secs: None,
        }
    }

    pub fn with_max_idle_conns(mut self, max_idle_conns: u32) -> Self {
        self.max_idle_conns = Some(max_idle_conns);
        self
    }

    pub fn with_max_open_conns(mut self, max_open_conns: u32) -> Self {
        self.max_open_conns = Some(max_open_conns);
        self
    }

    pub fn with_max_conn_lifetime_secs(mut self, secs: u64) -> Self {
        self.max_conn_lifetime_secs = Some(secs);
        self
    }

    /// Parse a configuration from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| format!("Invalid database config: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {e}", path.display()))?;
        Self::from_json_str(&json)
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.driver_name.trim().is_empty() {
            return Err("driver_name cannot be empty".to_string());
        }
        if self.data_source_name.trim().is_empty() {
            return Err("data_source_name cannot be empty".to_string());
        }
        if let Some(max) = self.max_open_conns {
            if max == 0 {
                return Err("max_open_conns must be greater than 0".to_string());
            }
            if let Some(idle) = self.max_idle_conns {
                if idle > max {
                    return Err(format!(
                        "max_idle_conns ({}) cannot exceed max_open_conns ({})",
                        idle, max
                    ));
                }
            }
        }
        Ok(())
    }

    /// The backend named by `driver_name`, if it is a supported driver.
    pub fn database_type(&self) -> Option<DatabaseType> {
        DatabaseType::from_driver_name(&self.driver_name)
    }

    /// Connection lifetime as a Duration.
    pub fn max_conn_lifetime(&self) -> Option<Duration> {
        self.max_conn_lifetime_secs.map(Duration::from_secs)
    }

    /// Idle timeout implied by `max_idle_conns`; `None` keeps the driver default.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.max_idle_conns {
            Some(0) => Some(IDLE_RELEASE_TIMEOUT),
            _ => None,
        }
    }

    /// Get a display-safe version of the data source (password masked).
    pub fn masked_data_source(&self) -> String {
        match Url::parse(&self.data_source_name) {
            Ok(mut url) if url.password().is_some() => {
                // set_password only fails for cannot-be-a-base URLs, which have no password
                let _ = url.set_password(Some("****"));
                url.to_string()
            }
            Ok(url) => url.to_string(),
            Err(_) => "<unparseable data source>".to_string(),
        }
    }
}

/// Command line configuration for the `db-rowmap` operator binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-rowmap",
    about = "Operate the row mapping layer: ping a database or draw sequence values",
    version,
    author
)]
pub struct Cli {
    /// JSON file holding a database configuration. Overrides --driver/--dsn.
    #[arg(short, long, value_name = "FILE", env = "ROWMAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database driver (sqlite, postgres, mysql)
    #[arg(long, env = "ROWMAP_DRIVER")]
    pub driver: Option<String>,

    /// Data source URL, e.g. sqlite:data.db?mode=rwc
    #[arg(long, value_name = "URL", env = "ROWMAP_DSN")]
    pub dsn: Option<String>,

    /// Idle connections kept in the pool
    #[arg(long, env = "ROWMAP_MAX_IDLE_CONNS")]
    pub max_idle_conns: Option<u32>,

    /// Maximum open connections
    #[arg(long, env = "ROWMAP_MAX_OPEN_CONNS")]
    pub max_open_conns: Option<u32>,

    /// Maximum connection lifetime in seconds
    #[arg(long, env = "ROWMAP_MAX_CONN_LIFETIME")]
    pub max_conn_lifetime: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "ROWMAP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "ROWMAP_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Open the database and run a trivial round-trip
    Ping,
    /// Draw values from a named sequence (seeded from max(id) of the table)
    Next {
        /// Sequence name, which is also the backing table name
        name: String,
        /// Number of values to draw
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
}

impl Cli {
    /// Resolve the database configuration from a file or individual flags.
    pub fn database_config(&self) -> Result<DatabaseConfig, String> {
        if let Some(path) = &self.config {
            return DatabaseConfig::from_json_file(path);
        }
        let driver = self
            .driver
            .clone()
            .ok_or_else(|| "Either --config or --driver must be given".to_string())?;
        let dsn = self
            .dsn
            .clone()
            .ok_or_else(|| "Either --config or --dsn must be given".to_string())?;
        let config = DatabaseConfig {
            driver_name: driver,
            data_source_name: dsn,
            max_idle_conns: self.max_idle_conns,
            max_open_conns: self.max_open_conns,
            max_conn_lifetime_secs: self.max_conn_lifetime,
        };
        config.validate()?;
        Ok(config)
    }
}
