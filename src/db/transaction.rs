//! Transactional execution.
//!
//! [`TransactionalExecutor`] owns the open/begin/commit/rollback/close
//! lifecycle around a unit of work. Three shapes are offered:
//!
//! - [`TransactionalExecutor::execute`] runs a [`UnitOfWork`] in its own
//!   connection and transaction.
//! - [`TxContext::execute_in_context`] runs another unit of work on an
//!   already-open transaction, with no boundary of its own.
//! - [`TransactionalExecutor::execute_fn`] runs a closure that receives the
//!   open transaction and an argument list, returning its result after commit.
//!
//! A failure (an `Err` or a panic) inside the unit of work rolls the
//! transaction back exactly once, best effort, and is then re-raised. The
//! connection is closed on every exit path.

use crate::config::DatabaseConfig;
use crate::db::connection::{Database, open_connection};
use crate::db::mapper::{self, PreparedQuery};
use crate::db::record::{Record, RecordSet};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, FieldType, Value};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use sqlx::any::AnyRow;
use sqlx::{Any, AnyConnection, AnyPool, Transaction};
use std::any::Any as PanicPayload;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// A caller-supplied operation executed inside one transaction boundary.
///
/// Implementors may write `async fn execute(&mut self, ctx: &mut TxContext)`.
pub trait UnitOfWork: Send {
    type Output: Send;

    fn execute(
        &mut self,
        ctx: &mut TxContext,
    ) -> impl Future<Output = DbResult<Self::Output>> + Send;
}

/// An open connection and transaction handed to a unit of work.
pub struct TxContext {
    tx: Transaction<'static, Any>,
    pool: AnyPool,
    db_type: DatabaseType,
}

impl std::fmt::Debug for TxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxContext")
            .field("db_type", &self.db_type)
            .finish_non_exhaustive()
    }
}

impl TxContext {
    /// Begin a transaction on `database`.
    pub(crate) async fn begin(database: &Database) -> DbResult<Self> {
        let tx = database
            .pool()
            .begin()
            .await
            .map_err(|e| DbError::transaction(format!("Failed to begin transaction: {}", e)))?;
        debug!(target: "persistence", db_type = %database.db_type(), "Transaction started");
        Ok(Self {
            tx,
            pool: database.pool().clone(),
            db_type: database.db_type(),
        })
    }

    /// Get the database type of the underlying handle.
    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// The pool this transaction was opened from.
    ///
    /// Statements run directly on the pool are outside the transaction.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// The connection holding the transaction.
    pub fn connection(&mut self) -> &mut AnyConnection {
        &mut self.tx
    }

    /// Run `work` on this transaction. Failures propagate to the enclosing
    /// executor, which rolls back.
    pub async fn execute_in_context<W: UnitOfWork>(&mut self, work: &mut W) -> DbResult<W::Output> {
        work.execute(self).await
    }

    /// See [`mapper::query_records`].
    pub async fn query_records<R: Record>(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<R>> {
        mapper::query_records(self.connection(), sql, params).await
    }

    /// See [`mapper::query_records_positional`].
    pub async fn query_records_positional<R: Record>(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<R>> {
        mapper::query_records_positional(self.connection(), sql, params).await
    }

    /// See [`mapper::query_joined`].
    pub async fn query_joined<S: RecordSet>(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<S>> {
        mapper::query_joined(self.connection(), sql, params).await
    }

    /// See [`mapper::execute_record`].
    pub async fn execute_record<R: Record>(
        &mut self,
        sql: &str,
        record: &R,
        field_offset: usize,
    ) -> DbResult<u64> {
        mapper::execute_record(self.connection(), sql, record, field_offset).await
    }

    /// See [`mapper::execute`].
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        mapper::execute(self.connection(), sql, params).await
    }

    /// See [`mapper::query_singleton`].
    pub async fn query_singleton(
        &mut self,
        sql: &str,
        params: &[Value],
        slot_types: &[FieldType],
    ) -> DbResult<Option<Vec<Value>>> {
        mapper::query_singleton(self.connection(), sql, params, slot_types).await
    }

    /// See [`mapper::prepare`].
    pub async fn prepare(&mut self, sql: &str) -> DbResult<PreparedQuery> {
        mapper::prepare(self.connection(), sql).await
    }

    /// See [`mapper::query_records_stmt`].
    pub async fn query_records_stmt<R: Record>(
        &mut self,
        statement: &PreparedQuery,
        params: &[Value],
    ) -> DbResult<Vec<R>> {
        mapper::query_records_stmt(self.connection(), statement, params).await
    }

    /// See [`mapper::query_records_positional_stmt`].
    pub async fn query_records_positional_stmt<R: Record>(
        &mut self,
        statement: &PreparedQuery,
        params: &[Value],
    ) -> DbResult<Vec<R>> {
        mapper::query_records_positional_stmt(self.connection(), statement, params).await
    }

    /// See [`mapper::query_joined_stmt`].
    pub async fn query_joined_stmt<S: RecordSet>(
        &mut self,
        statement: &PreparedQuery,
        params: &[Value],
    ) -> DbResult<Vec<S>> {
        mapper::query_joined_stmt(self.connection(), statement, params).await
    }

    /// See [`mapper::execute_record_stmt`].
    pub async fn execute_record_stmt<R: Record>(
        &mut self,
        statement: &PreparedQuery,
        record: &R,
        field_offset: usize,
    ) -> DbResult<u64> {
        mapper::execute_record_stmt(self.connection(), statement, record, field_offset).await
    }

    /// See [`mapper::execute_stmt`].
    pub async fn execute_stmt(
        &mut self,
        statement: &PreparedQuery,
        params: &[Value],
    ) -> DbResult<u64> {
        mapper::execute_stmt(self.connection(), statement, params).await
    }

    /// See [`mapper::query_singleton_stmt`].
    pub async fn query_singleton_stmt(
        &mut self,
        statement: &PreparedQuery,
        params: &[Value],
        slot_types: &[FieldType],
    ) -> DbResult<Option<Vec<Value>>> {
        mapper::query_singleton_stmt(self.connection(), statement, params, slot_types).await
    }

    /// See [`mapper::query_rows`].
    pub fn query_rows<'c>(
        &'c mut self,
        statement: &'c PreparedQuery,
        params: &[Value],
    ) -> DbResult<BoxStream<'c, DbResult<AnyRow>>> {
        mapper::query_rows(self.connection(), statement, params)
    }

    async fn commit(self) -> DbResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| DbError::transaction(format!("Failed to commit transaction: {}", e)))?;
        debug!(target: "persistence", "Transaction committed");
        Ok(())
    }

    /// Roll back once. A rollback failure is logged, never raised, so the
    /// failure that triggered it stays the one the caller sees.
    async fn rollback_after(self, cause: &str) {
        match self.tx.rollback().await {
            Ok(()) => debug!(target: "persistence", cause = %cause, "Transaction rolled back"),
            Err(e) => warn!(
                target: "persistence",
                error = %e,
                cause = %cause,
                "Rollback failed"
            ),
        }
    }
}

/// Runs units of work, each in a connection and transaction of its own.
#[derive(Debug, Clone)]
pub struct TransactionalExecutor {
    config: DatabaseConfig,
}

impl TransactionalExecutor {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Open a connection, begin a transaction, run `work`, and commit.
    ///
    /// On failure the transaction is rolled back and the failure returned (or
    /// the panic resumed). The connection is closed in every case.
    pub async fn execute<W: UnitOfWork>(&self, work: &mut W) -> DbResult<W::Output> {
        let database = open_connection(&self.config).await?;
        let outcome = AssertUnwindSafe(run_unit_of_work(&database, work))
            .catch_unwind()
            .await;
        database.close().await;
        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Same lifecycle as [`execute`](Self::execute), for a closure taking the
    /// open transaction and `args`.
    ///
    /// ```ignore
    /// let total = executor
    ///     .execute_fn(vec![Value::Int(7)], |ctx, args| {
    ///         Box::pin(async move {
    ///             let rows = ctx.query_singleton("SELECT SUM(total) FROM orders WHERE customer_id = ?", &args, &[FieldType::Float]).await?;
    ///             Ok(rows)
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn execute_fn<F, T>(&self, args: Vec<Value>, f: F) -> DbResult<T>
    where
        F: for<'c> FnOnce(&'c mut TxContext, Vec<Value>) -> BoxFuture<'c, DbResult<T>> + Send,
        T: Send,
    {
        let mut work = FnUnit {
            f: Some(f),
            args,
            _output: PhantomData,
        };
        self.execute(&mut work).await
    }
}

async fn run_unit_of_work<W: UnitOfWork>(
    database: &Database,
    work: &mut W,
) -> DbResult<W::Output> {
    let mut ctx = TxContext::begin(database).await?;
    let outcome = AssertUnwindSafe(work.execute(&mut ctx))
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(output)) => {
            ctx.commit().await?;
            Ok(output)
        }
        Ok(Err(err)) => {
            ctx.rollback_after(&err.to_string()).await;
            Err(err)
        }
        Err(payload) => {
            ctx.rollback_after(&panic_message(payload.as_ref())).await;
            panic::resume_unwind(payload)
        }
    }
}

/// Adapts a closure to [`UnitOfWork`].
struct FnUnit<F, T> {
    f: Option<F>,
    args: Vec<Value>,
    _output: PhantomData<fn() -> T>,
}

impl<F, T> UnitOfWork for FnUnit<F, T>
where
    F: for<'c> FnOnce(&'c mut TxContext, Vec<Value>) -> BoxFuture<'c, DbResult<T>> + Send,
    T: Send,
{
    type Output = T;

    fn execute(&mut self, ctx: &mut TxContext) -> impl Future<Output = DbResult<T>> + Send {
        let f = self.f.take();
        let args = std::mem::take(&mut self.args);
        async move {
            match f {
                Some(f) => f(ctx, args).await,
                None => Err(DbError::internal("Unit of work already consumed")),
            }
        }
    }
}

fn panic_message(payload: &(dyn PanicPayload + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic: <non-string payload>".to_string()
    }
}
