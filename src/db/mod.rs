//! Persistence layer.
//!
//! This module provides the row mapping core:
//! - Connection factory over the `Any` driver
//! - Record shapes registered through field descriptors
//! - Column resolution and row mapping (single and multi-shape)
//! - Transactional execution of units of work
//! - Named sequences seeded from the database

#[macro_use]
pub mod macros;
pub mod connection;
pub mod mapper;
pub mod params;
pub mod record;
pub mod resolver;
pub mod sequence;
pub mod transaction;

pub use connection::{Database, open_connection};
pub use mapper::{PreparedQuery, scan_row};
pub use record::{FieldDescriptor, FieldSlot, Record, RecordSet, RecordShape};
pub use resolver::{ColumnPlan, FlatPlan};
pub use sequence::{Sequence, SequenceRegistry};
pub use transaction::{TransactionalExecutor, TxContext, UnitOfWork};
