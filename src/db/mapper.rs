//! Row mapping.
//!
//! Executes statements and converts result rows into records using the column
//! plans produced by the resolver. Every function takes the connection to run
//! on, which is normally the connection of an open transaction
//! ([`TxContext::connection`](crate::db::TxContext::connection)).
//!
//! Each query is prepared first so column names are known even for empty
//! results. The `*_stmt` variants take a [`PreparedQuery`] so one description
//! can serve many executions, e.g. a batch of inserts. Rows are streamed; the
//! cursor is dropped on every return path, and a failure never yields a
//! partial result.

use crate::db::params::bind_all;
use crate::db::record::{Record, RecordSet, RecordShape};
use crate::db::resolver::{ColumnPlan, flatten_shapes, resolve_columns, resolve_positional};
use crate::error::{DbError, DbResult};
use crate::models::{FieldType, Value};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use sqlx::any::{AnyArguments, AnyRow, AnyTypeInfoKind};
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, Column, Either, Executor, Row, Statement};
use tracing::debug;

/// A statement described once and executed any number of times.
///
/// Carries the result column names and the parameter types the backend
/// reported. Executions go through the driver's per-connection statement
/// cache, so the server-side statement is reused as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedQuery {
    sql: String,
    columns: Vec<String>,
    param_kinds: Vec<AnyTypeInfoKind>,
}

impl PreparedQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Result column names, in result order. Empty for statements without rows.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn query(&self, params: &[Value]) -> DbResult<Query<'_, Any, AnyArguments<'_>>> {
        bind_all(sqlx::query(&self.sql), params, &self.param_kinds)
    }
}

/// Describe `sql` on `conn`.
pub async fn prepare(conn: &mut AnyConnection, sql: &str) -> DbResult<PreparedQuery> {
    let statement = (&mut *conn).prepare(sql).await.map_err(|e| match e {
        sqlx::Error::Database(db_err) => DbError::query(
            format!("Failed to prepare statement: {}", db_err.message()),
            db_err.code().map(|c| c.to_string()),
            "Check the SQL syntax and referenced objects",
        ),
        other => DbError::from(other),
    })?;

    let columns = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let param_kinds = match statement.parameters() {
        Some(Either::Left(types)) => types.iter().map(|t| t.kind()).collect(),
        _ => Vec::new(),
    };

    Ok(PreparedQuery {
        sql: sql.to_string(),
        columns,
        param_kinds,
    })
}

/// Map each row to a fresh `R`, binding columns to fields by name.
pub async fn query_records<R: Record>(
    conn: &mut AnyConnection,
    sql: &str,
    params: &[Value],
) -> DbResult<Vec<R>> {
    let statement = prepare(conn, sql).await?;
    query_records_stmt(conn, &statement, params).await
}

/// [`query_records`] on an already prepared statement.
pub async fn query_records_stmt<R: Record>(
    conn: &mut AnyConnection,
    statement: &PreparedQuery,
    params: &[Value],
) -> DbResult<Vec<R>> {
    let shape = R::shape();
    let plan = resolve_columns(&shape, statement.columns())?;
    map_rows(conn, statement, params, &shape, &plan).await
}

/// Map each row to a fresh `R`, binding columns to fields in declaration order.
///
/// Transient fields still consume their column; the value is discarded.
pub async fn query_records_positional<R: Record>(
    conn: &mut AnyConnection,
    sql: &str,
    params: &[Value],
) -> DbResult<Vec<R>> {
    let statement = prepare(conn, sql).await?;
    query_records_positional_stmt(conn, &statement, params).await
}

/// [`query_records_positional`] on an already prepared statement.
pub async fn query_records_positional_stmt<R: Record>(
    conn: &mut AnyConnection,
    statement: &PreparedQuery,
    params: &[Value],
) -> DbResult<Vec<R>> {
    let shape = R::shape();
    let plan = resolve_positional(&shape, statement.columns().len())?;
    map_rows(conn, statement, params, &shape, &plan).await
}

async fn map_rows<R: Record>(
    conn: &mut AnyConnection,
    statement: &PreparedQuery,
    params: &[Value],
    shape: &RecordShape<R>,
    plan: &ColumnPlan,
) -> DbResult<Vec<R>> {
    let mut rows = statement.query(params)?.fetch(&mut *conn);
    let mut records = Vec::new();
    while let Some(row) = rows.try_next().await? {
        let mut record = R::default();
        for (column, field, field_type) in plan.iter() {
            let value = scan_slot(&row, column, field_type)?;
            if shape.fields()[field].is_transient() {
                continue;
            }
            shape.assign(&mut record, field, value)?;
        }
        records.push(record);
    }

    debug!(
        target: "persistence",
        record = shape.name(),
        rows = records.len(),
        "Mapped rows"
    );
    Ok(records)
}

/// Map each joined row to one instance per shape of `S`.
///
/// Columns are partitioned by position: the first shape's fields take the
/// leading columns, the next shape the following ones, and so on.
pub async fn query_joined<S: RecordSet>(
    conn: &mut AnyConnection,
    sql: &str,
    params: &[Value],
) -> DbResult<Vec<S>> {
    let statement = prepare(conn, sql).await?;
    query_joined_stmt(conn, &statement, params).await
}

/// [`query_joined`] on an already prepared statement.
pub async fn query_joined_stmt<S: RecordSet>(
    conn: &mut AnyConnection,
    statement: &PreparedQuery,
    params: &[Value],
) -> DbResult<Vec<S>> {
    let shapes = S::shapes();
    let plan = flatten_shapes(S::slots(&shapes), statement.columns())?;

    let mut rows = statement.query(params)?.fetch(&mut *conn);
    let mut out = Vec::new();
    while let Some(row) = rows.try_next().await? {
        let values = plan
            .slots()
            .iter()
            .enumerate()
            .map(|(column, slot)| scan_slot(&row, column, slot.field_type))
            .collect::<DbResult<Vec<_>>>()?;
        out.push(S::assemble(&shapes, values)?);
    }

    debug!(target: "persistence", rows = out.len(), "Mapped joined rows");
    Ok(out)
}

/// Execute `sql` with the fields of `record` from `field_offset` onward as
/// positional parameters.
///
/// Every field from the offset on is bound, transient ones included.
pub async fn execute_record<R: Record>(
    conn: &mut AnyConnection,
    sql: &str,
    record: &R,
    field_offset: usize,
) -> DbResult<u64> {
    let statement = prepare(conn, sql).await?;
    execute_record_stmt(conn, &statement, record, field_offset).await
}

/// [`execute_record`] on an already prepared statement.
pub async fn execute_record_stmt<R: Record>(
    conn: &mut AnyConnection,
    statement: &PreparedQuery,
    record: &R,
    field_offset: usize,
) -> DbResult<u64> {
    let values = R::shape().values_from(record, field_offset)?;
    execute_stmt(conn, statement, &values).await
}

/// Execute a statement with positional parameters and return rows affected.
pub async fn execute(conn: &mut AnyConnection, sql: &str, params: &[Value]) -> DbResult<u64> {
    let statement = prepare(conn, sql).await?;
    execute_stmt(conn, &statement, params).await
}

/// [`execute`] on an already prepared statement.
pub async fn execute_stmt(
    conn: &mut AnyConnection,
    statement: &PreparedQuery,
    params: &[Value],
) -> DbResult<u64> {
    let result = statement.query(params)?.execute(&mut *conn).await?;

    debug!(
        target: "persistence",
        sql = %statement.sql(),
        params = params.len(),
        rows_affected = result.rows_affected(),
        "Executed statement"
    );
    Ok(result.rows_affected())
}

/// Scan the first row into slots of the given types.
///
/// Returns `None` when the query yields no rows. The column count must equal
/// the number of slot types.
pub async fn query_singleton(
    conn: &mut AnyConnection,
    sql: &str,
    params: &[Value],
    slot_types: &[FieldType],
) -> DbResult<Option<Vec<Value>>> {
    let statement = prepare(conn, sql).await?;
    query_singleton_stmt(conn, &statement, params, slot_types).await
}

/// [`query_singleton`] on an already prepared statement.
pub async fn query_singleton_stmt(
    conn: &mut AnyConnection,
    statement: &PreparedQuery,
    params: &[Value],
    slot_types: &[FieldType],
) -> DbResult<Option<Vec<Value>>> {
    check_slot_count(statement.columns().len(), slot_types.len(), "singleton")?;

    let mut rows = statement.query(params)?.fetch(&mut *conn);
    match rows.try_next().await? {
        Some(row) => scan_values(&row, slot_types).map(Some),
        None => Ok(None),
    }
}

/// Stream the raw rows of a prepared statement. Decode them with [`scan_row`].
pub fn query_rows<'c>(
    conn: &'c mut AnyConnection,
    statement: &'c PreparedQuery,
    params: &[Value],
) -> DbResult<BoxStream<'c, DbResult<AnyRow>>> {
    let rows = statement.query(params)?.fetch(conn);
    Ok(rows.map_err(DbError::from).boxed())
}

/// Decode every column of `row` into slots of the given types.
pub fn scan_row(row: &AnyRow, slot_types: &[FieldType]) -> DbResult<Vec<Value>> {
    check_slot_count(row.columns().len(), slot_types.len(), "row")?;
    scan_values(row, slot_types)
}

fn check_slot_count(columns: usize, slots: usize, target: &str) -> DbResult<()> {
    if columns != slots {
        return Err(DbError::mapping(
            format!(
                "Result set column count ({}) differs from slot count ({})",
                columns, slots
            ),
            target,
        ));
    }
    Ok(())
}

fn scan_values(row: &AnyRow, slot_types: &[FieldType]) -> DbResult<Vec<Value>> {
    slot_types
        .iter()
        .enumerate()
        .map(|(column, &ty)| scan_slot(row, column, ty))
        .collect()
}

/// Decode one column into a value of the slot type. NULL decodes to `Value::Null`.
fn scan_slot(row: &AnyRow, column: usize, field_type: FieldType) -> DbResult<Value> {
    let value = match field_type {
        FieldType::Bool => match row.try_get::<Option<bool>, _>(column) {
            Ok(v) => v.map(Value::Bool),
            // SQLite and MySQL store booleans as integers
            Err(_) => row
                .try_get::<Option<i64>, _>(column)?
                .map(|v| Value::Bool(v != 0)),
        },
        FieldType::Int => row.try_get::<Option<i64>, _>(column)?.map(Value::Int),
        FieldType::Float => match row.try_get::<Option<f64>, _>(column) {
            Ok(v) => v.map(Value::Float),
            Err(_) => row
                .try_get::<Option<i64>, _>(column)?
                .map(|v| Value::Float(v as f64)),
        },
        FieldType::Text => match row.try_get::<Option<String>, _>(column) {
            Ok(v) => v.map(Value::Text),
            Err(_) => match row.try_get::<Option<i64>, _>(column) {
                Ok(v) => v.map(|n| Value::Text(n.to_string())),
                Err(_) => row
                    .try_get::<Option<f64>, _>(column)?
                    .map(|n| Value::Text(n.to_string())),
            },
        },
        FieldType::Bytes => row.try_get::<Option<Vec<u8>>, _>(column)?.map(Value::Bytes),
    };
    Ok(value.unwrap_or(Value::Null))
}
