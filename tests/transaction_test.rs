//! Integration tests for transactional execution.

mod common;

use common::capture_logs;
use db_rowmap::db::{TransactionalExecutor, TxContext, UnitOfWork};
use db_rowmap::{DatabaseConfig, DbError, DbResult, FieldType, Value};
use tempfile::NamedTempFile;

struct InsertCustomer {
    name: &'static str,
}

impl UnitOfWork for InsertCustomer {
    type Output = u64;

    async fn execute(&mut self, ctx: &mut TxContext) -> DbResult<u64> {
        ctx.execute(
            "INSERT INTO customers (name) VALUES (?)",
            &[Value::from(self.name)],
        )
        .await
    }
}

/// Inserts two customers through nested units of work sharing one transaction.
struct InsertPair {
    fail_after: bool,
}

impl UnitOfWork for InsertPair {
    type Output = i64;

    async fn execute(&mut self, ctx: &mut TxContext) -> DbResult<i64> {
        ctx.execute_in_context(&mut InsertCustomer { name: "Ada" })
            .await?;
        ctx.execute_in_context(&mut InsertCustomer { name: "Bob" })
            .await?;
        if self.fail_after {
            return Err(DbError::invalid_input("second thoughts"));
        }
        count_in(ctx).await
    }
}

/// Ends the transaction behind the executor's back, so its own rollback fails.
struct EndTransactionThenFail;

impl UnitOfWork for EndTransactionThenFail {
    type Output = ();

    async fn execute(&mut self, ctx: &mut TxContext) -> DbResult<()> {
        ctx.execute("INSERT INTO customers (name) VALUES ('Orphan')", &[])
            .await?;
        ctx.execute("ROLLBACK", &[]).await?;
        Err(DbError::invalid_input("original failure"))
    }
}

struct InsertThenPanic;

impl UnitOfWork for InsertThenPanic {
    type Output = ();

    async fn execute(&mut self, ctx: &mut TxContext) -> DbResult<()> {
        ctx.execute("INSERT INTO customers (name) VALUES ('Ghost')", &[])
            .await?;
        panic!("unit of work failed after writing");
    }
}

async fn count_in(ctx: &mut TxContext) -> DbResult<i64> {
    match ctx
        .query_singleton("SELECT COUNT(*) FROM customers", &[], &[FieldType::Int])
        .await?
        .as_deref()
    {
        Some([Value::Int(count)]) => Ok(*count),
        other => Err(DbError::internal(format!("unexpected count row: {:?}", other))),
    }
}

async fn setup() -> (NamedTempFile, TransactionalExecutor) {
    let temp_file = NamedTempFile::new().unwrap();
    let dsn = format!("sqlite:{}?mode=rwc", temp_file.path().to_str().unwrap());
    let executor = TransactionalExecutor::new(DatabaseConfig::new("sqlite", dsn));

    executor
        .execute_fn(Vec::new(), |ctx, _args| {
            Box::pin(async move {
                ctx.execute(
                    "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                    &[],
                )
                .await
            })
        })
        .await
        .expect("schema setup should succeed");

    (temp_file, executor)
}

async fn count(executor: &TransactionalExecutor) -> i64 {
    executor
        .execute_fn(Vec::new(), |ctx, _args| Box::pin(count_in(ctx)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_commit_makes_writes_visible() {
    let (_file, executor) = setup().await;

    let affected = executor
        .execute(&mut InsertCustomer { name: "Ada" })
        .await
        .unwrap();

    assert_eq!(affected, 1);
    assert_eq!(count(&executor).await, 1);
}

#[tokio::test]
async fn test_error_rolls_back_writes() {
    let (_file, executor) = setup().await;

    let result = executor
        .execute_fn(vec![Value::from("Ada")], |ctx, args| {
            Box::pin(async move {
                ctx.execute("INSERT INTO customers (name) VALUES (?)", &args)
                    .await?;
                Err::<(), _>(DbError::invalid_input("abort after insert"))
            })
        })
        .await;

    assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    assert_eq!(count(&executor).await, 0);
}

#[tokio::test]
async fn test_panic_rolls_back_and_resumes() {
    let (_file, executor) = setup().await;

    let task_executor = executor.clone();
    let handle = tokio::spawn(async move { task_executor.execute(&mut InsertThenPanic).await });
    let join_err = handle.await.unwrap_err();

    assert!(join_err.is_panic());
    assert_eq!(count(&executor).await, 0);
}

#[tokio::test]
async fn test_nested_units_share_one_transaction() {
    let (_file, executor) = setup().await;

    let seen = executor
        .execute(&mut InsertPair { fail_after: false })
        .await
        .unwrap();
    assert_eq!(seen, 2);
    assert_eq!(count(&executor).await, 2);
}

#[tokio::test]
async fn test_nested_failure_rolls_back_whole_boundary() {
    let (_file, executor) = setup().await;

    let result = executor.execute(&mut InsertPair { fail_after: true }).await;

    assert!(result.is_err());
    assert_eq!(count(&executor).await, 0);
}

#[tokio::test]
async fn test_execute_fn_returns_result_after_commit() {
    let (_file, executor) = setup().await;

    let ids = executor
        .execute_fn(
            vec![Value::from("Ada"), Value::from("Bob")],
            |ctx, args| {
                Box::pin(async move {
                    let mut inserted = 0;
                    for name in args {
                        inserted += ctx
                            .execute("INSERT INTO customers (name) VALUES (?)", &[name])
                            .await?;
                    }
                    Ok(inserted)
                })
            },
        )
        .await
        .unwrap();

    assert_eq!(ids, 2);
    assert_eq!(count(&executor).await, 2);
}

#[tokio::test]
async fn test_unreachable_database_is_connection_error() {
    let executor = TransactionalExecutor::new(DatabaseConfig::new(
        "sqlite",
        "sqlite:/nonexistent-dir/never.db",
    ));

    let result = executor.execute(&mut InsertCustomer { name: "Ada" }).await;

    assert!(matches!(result, Err(DbError::Connection { .. })));
}

#[tokio::test]
async fn test_rollback_failure_is_logged_and_original_error_surfaces() {
    let (_file, executor) = setup().await;
    let (logs, _guard) = capture_logs();

    let result = executor.execute(&mut EndTransactionThenFail).await;

    match result {
        Err(DbError::InvalidInput { message }) => assert_eq!(message, "original failure"),
        other => panic!("expected the unit of work's own error, got {:?}", other),
    }
    let output = logs.contents();
    assert!(output.contains("Rollback failed"), "logs: {}", output);
    assert!(output.contains("original failure"), "logs: {}", output);
    assert_eq!(count(&executor).await, 0);
}

#[tokio::test]
async fn test_rollback_after_error_is_logged() {
    let (_file, executor) = setup().await;
    let (logs, _guard) = capture_logs();

    let result = executor
        .execute_fn(Vec::new(), |_ctx, _args| {
            Box::pin(async move { Err::<(), _>(DbError::invalid_input("nothing to keep")) })
        })
        .await;

    assert!(result.is_err());
    let output = logs.contents();
    assert!(output.contains("Transaction rolled back"), "logs: {}", output);
    assert!(!output.contains("Rollback failed"), "logs: {}", output);
}
