//! Data models shared by the configuration and database layers.

pub mod connection;
pub mod value;

pub use connection::DatabaseType;
pub use value::{FieldType, SqlValue, Value};
