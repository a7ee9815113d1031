//! DB Rowmap Library
//!
//! Maps SQL result rows onto registered record shapes, runs units of work
//! inside transactions, and issues named sequence values (SQLite, PostgreSQL,
//! MySQL).

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::DatabaseConfig;
pub use db::{
    Database, Record, RecordSet, RecordShape, SequenceRegistry, TransactionalExecutor, TxContext,
    UnitOfWork,
};
pub use error::{DbError, DbResult};
pub use models::{DatabaseType, FieldType, SqlValue, Value};
