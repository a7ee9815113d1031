//! Connection factory.
//!
//! Opens a database handle from a [`DatabaseConfig`] and applies the pool
//! limits it carries. There are no retries: a rejected data source or an
//! unreachable server fails immediately with a connection error.

use crate::config::DatabaseConfig;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use sqlx::AnyPool;
use sqlx::any::{AnyPoolOptions, install_default_drivers};
use tracing::{debug, info};

/// An open database handle.
///
/// Owned by whichever executor call opened it and closed exactly once on that
/// call's exit path. `close` consumes the handle.
#[derive(Debug)]
pub struct Database {
    pool: AnyPool,
    db_type: DatabaseType,
}

/// Open a database handle from configuration.
pub async fn open_connection(config: &DatabaseConfig) -> DbResult<Database> {
    Database::open(config).await
}

impl Database {
    /// Open a database handle, applying only the pool limits that are set.
    pub async fn open(config: &DatabaseConfig) -> DbResult<Self> {
        config
            .validate()
            .map_err(|e| DbError::connection(e, "Fix the database configuration"))?;

        let db_type = config.database_type().ok_or_else(|| {
            DbError::connection(
                format!("Unknown database driver '{}'", config.driver_name),
                "Use one of: sqlite, postgres, mysql",
            )
        })?;

        if DatabaseType::from_connection_string(&config.data_source_name) != Some(db_type) {
            return Err(DbError::connection(
                format!(
                    "Driver '{}' rejects the data source name",
                    config.driver_name
                ),
                format!(
                    "Use a {} connection URL, e.g. {}",
                    db_type,
                    db_type.url_example()
                ),
            ));
        }

        install_default_drivers();

        let mut options = AnyPoolOptions::new();
        if let Some(max) = config.max_open_conns {
            options = options.max_connections(max);
        }
        if let Some(idle_timeout) = config.idle_timeout() {
            options = options.idle_timeout(idle_timeout);
        }
        if let Some(lifetime) = config.max_conn_lifetime() {
            options = options.max_lifetime(lifetime);
        }

        info!(
            db_type = %db_type,
            data_source = %config.masked_data_source(),
            max_open_conns = ?config.max_open_conns,
            max_idle_conns = ?config.max_idle_conns,
            "Opening database"
        );

        let pool = options
            .connect(&config.data_source_name)
            .await
            .map_err(|e| {
                DbError::connection(
                    format!("Failed to connect: {}", e),
                    connection_suggestion(db_type, &e),
                )
            })?;

        Ok(Self { pool, db_type })
    }

    /// Get the database type for this handle.
    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Run a trivial round-trip to prove the database answers.
    pub async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        debug!(db_type = %self.db_type, "Ping succeeded");
        Ok(())
    }

    /// Close the handle and every pooled connection.
    pub async fn close(self) {
        self.pool.close().await;
        debug!(db_type = %self.db_type, "Database closed");
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and password in the connection string".to_string();
    }

    if error_str.contains("does not exist")
        || error_str.contains("unknown database")
        || error_str.contains("unable to open")
    {
        return "Check that the database exists (SQLite needs ?mode=rwc to create it)".to_string();
    }

    format!(
        "Verify the connection string format: {}",
        db_type.url_example()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_driver_is_connection_error() {
        let config = DatabaseConfig::new("oracle", "oracle://localhost/db");
        let result = open_connection(&config).await;
        assert!(matches!(result, Err(DbError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_driver_rejects_foreign_data_source() {
        let config = DatabaseConfig::new("postgres", "sqlite:data.db");
        let err = open_connection(&config).await.unwrap_err();
        assert!(err.to_string().contains("rejects the data source name"));
        assert!(err.suggestion().unwrap().contains("postgres://"));
    }

    #[tokio::test]
    async fn test_invalid_pool_limits_rejected() {
        let config = DatabaseConfig::new("sqlite", "sqlite::memory:").with_max_open_conns(0);
        let result = open_connection(&config).await;
        assert!(matches!(result, Err(DbError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_open_ping_close_memory_database() {
        let config = DatabaseConfig::new("sqlite", "sqlite::memory:")
            .with_max_open_conns(1)
            .with_max_conn_lifetime_secs(60);
        let database = open_connection(&config).await.unwrap();
        assert_eq!(database.db_type(), DatabaseType::SQLite);
        database.ping().await.unwrap();
        database.close().await;
    }

    #[tokio::test]
    async fn test_idle_ceiling_never_preopens_connections() {
        let config = DatabaseConfig::new("sqlite", "sqlite::memory:")
            .with_max_open_conns(4)
            .with_max_idle_conns(0);
        let database = open_connection(&config).await.unwrap();
        let options = database.pool().options();
        assert_eq!(options.get_min_connections(), 0);
        assert_eq!(options.get_idle_timeout(), Some(crate::config::IDLE_RELEASE_TIMEOUT));
        assert!(database.pool().size() <= 1);
        database.close().await;
    }

    #[test]
    fn test_connection_suggestion_for_refused() {
        let err = sqlx::Error::Protocol("connection refused".to_string());
        let suggestion = connection_suggestion(DatabaseType::PostgreSQL, &err);
        assert!(suggestion.contains("PostgreSQL server is running"));
    }
}
