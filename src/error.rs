//! Error types for the row mapping layer.
//!
//! Every failure in this crate is fatal to the operation that raised it. The
//! variants follow the failure taxonomy of the persistence layer: connection,
//! transaction and query errors, with column resolution problems reported as
//! a dedicated `Mapping` flavour of query error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Query error: {message}")]
    Query {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Mapping error: {message} (record: {record})")]
    Mapping { message: String, record: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a query error with optional SQL state.
    pub fn query(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a mapping error for the given record shape.
    pub fn mapping(message: impl Into<String>, record: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
            record: record.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Query { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// True for failures raised while preparing, executing or mapping a query.
    pub fn is_query_error(&self) -> bool {
        matches!(self, Self::Query { .. } | Self::Mapping { .. })
    }

    /// Get the SQLSTATE code reported by the driver, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Query { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::query(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out acquiring a connection from the pool",
                "Raise max_open_conns or shorten the units of work holding connections",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reopen the database handle")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::query(
                format!("Type not found: {}", type_name),
                None,
                "Check the column types returned by the query",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::query(
                format!("Column not found: {}", col),
                None,
                "Check the column names returned by the query",
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::query(
                format!("Column index {} out of bounds (len: {})", index, len),
                None,
                "Check the number of columns returned by the query",
            ),
            sqlx::Error::ColumnDecode { index, source } => DbError::query(
                format!("Failed to scan column {}: {}", index, source),
                None,
                "Check that the record field type matches the column type",
            ),
            sqlx::Error::Decode(source) => DbError::query(
                format!("Decode error: {}", source),
                None,
                "Check that the record field type matches the column type",
            ),
            sqlx::Error::AnyDriverError(err) => DbError::connection(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
