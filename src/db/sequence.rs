//! Named sequence generator.
//!
//! Each sequence is seeded once per registry from `MAX(id)` of the table that
//! shares its name, then incremented in memory. Lookup, seeding and increment
//! run under one lock, so concurrent callers never observe a duplicate value
//! and an unseen name is seeded exactly once.

use crate::config::DatabaseConfig;
use crate::db::transaction::TransactionalExecutor;
use crate::error::{DbError, DbResult};
use crate::models::{FieldType, Value};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A named counter and the last value it issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub name: String,
    pub last_value: i64,
}

/// Issues monotonically increasing values per sequence name.
///
/// Construct one per process and share it (for example behind an `Arc`).
/// Issued values are not persisted: a new registry re-seeds from the table
/// maximum.
#[derive(Debug)]
pub struct SequenceRegistry {
    executor: TransactionalExecutor,
    sequences: Mutex<HashMap<String, Sequence>>,
}

impl SequenceRegistry {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            executor: TransactionalExecutor::new(config),
            sequences: Mutex::new(HashMap::new()),
        }
    }

    /// Return the next value of `name`, seeding it from the database on first use.
    pub async fn next(&self, name: &str) -> DbResult<i64> {
        validate_name(name)?;

        let mut sequences = self.sequences.lock().await;
        let sequence = match sequences.entry(name.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let last_value = self.seed(name).await?;
                info!(target: "sequence", name = %name, seed = last_value, "Sequence seeded");
                entry.insert(Sequence {
                    name: name.to_string(),
                    last_value,
                })
            }
        };

        sequence.last_value = sequence.last_value.checked_add(1).ok_or_else(|| {
            DbError::internal(format!("Sequence '{}' overflowed", sequence.name))
        })?;
        debug!(target: "sequence", name = %name, value = sequence.last_value, "Issued value");
        Ok(sequence.last_value)
    }

    /// Last value issued for `name`, if it has been seeded.
    pub async fn current(&self, name: &str) -> Option<i64> {
        self.sequences
            .lock()
            .await
            .get(name)
            .map(|sequence| sequence.last_value)
    }

    async fn seed(&self, name: &str) -> DbResult<i64> {
        let sql = format!("SELECT MAX(id) FROM {}", name);
        let row = self
            .executor
            .execute_fn(Vec::new(), move |ctx, args| {
                Box::pin(async move { ctx.query_singleton(&sql, &args, &[FieldType::Int]).await })
            })
            .await?;

        match row.as_deref() {
            None | Some([Value::Null]) => Ok(0),
            Some([Value::Int(max)]) => Ok(*max),
            Some(other) => Err(DbError::internal(format!(
                "Unexpected seed row for sequence '{}': {:?}",
                name, other
            ))),
        }
    }
}

/// Sequence names are interpolated as table names, so only plain
/// (optionally schema-qualified) identifiers are accepted.
fn validate_name(name: &str) -> DbResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!(
            "Invalid sequence name '{}': expected a table identifier",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("invoice").is_ok());
        assert!(validate_name("billing.invoice_2024").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(".invoice").is_err());
        assert!(validate_name("invoice; DROP TABLE users").is_err());
        assert!(validate_name("in-voice").is_err());
    }

    #[tokio::test]
    async fn test_invalid_name_rejected_before_connecting() {
        // The data source is never opened for an invalid name.
        let registry = SequenceRegistry::new(DatabaseConfig::new("sqlite", "sqlite:/nonexistent/x.db"));
        let err = registry.next("bad name").await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert_eq!(registry.current("bad name").await, None);
    }
}
