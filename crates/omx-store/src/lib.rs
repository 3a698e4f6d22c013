//! Postgres write store.
//!
//! # Transactional contract
//!
//! Entity upsert + event append + outbox insert happen inside ONE database
//! transaction (READ COMMITTED), owned by the command processor. The
//! store's functions therefore take `impl PgExecutor` so the same code
//! serves both an open transaction and the pool.
//!
//! Concurrency control is delegated entirely to Postgres: the unique index
//! on `(session_id, cl_ord_id)` fences duplicate creates, `exec_id`
//! uniqueness fences duplicate fills, the `tx_nr` version column fences
//! concurrent updates, and `FOR UPDATE SKIP LOCKED` serializes outbox
//! claims. There are no application-level locks.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use omx_errors::OmxError;

pub mod events;
pub mod executions;
pub mod orders;
pub mod outbox;

pub use events::{EventRow, NewOrderEvent};
pub use executions::ExecutionInsert;
pub use orders::PgTx;
pub use outbox::{NewOutboxRow, OutboxBatch, OutboxRow};

pub const ENV_DB_URL: &str = "OMX_DATABASE_URL";

/// Connect to Postgres using OMX_DATABASE_URL with the default pool size.
pub async fn connect_from_env() -> Result<PgPool> {
    connect_from_env_with_pool_size(10).await
}

/// Connect to Postgres using OMX_DATABASE_URL (`db.connection.pool.size`
/// supplies `max_connections`).
pub async fn connect_from_env_with_pool_size(max_connections: u32) -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Test helper: connect via env and ensure the schema is present.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_orders_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Detect a Postgres unique constraint violation by name.
pub(crate) fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint)
                || (db_err.code().as_deref() == Some("23505")
                    && db_err.constraint() == Some(constraint))
        }
        _ => false,
    }
}

/// Map an unclassified driver error into the taxonomy. Constraint breaches
/// become DataIntegrity; everything else is Internal. The raw driver text
/// goes to the log, never to the caller-facing message.
pub(crate) fn db_error(err: sqlx::Error, what: &str) -> OmxError {
    let kind_is_integrity = matches!(
        &err,
        sqlx::Error::Database(db_err) if db_err.code().as_deref().map(|c| c.starts_with("23")).unwrap_or(false)
    );
    tracing::error!(operation = what, error = %err, "database error");
    if kind_is_integrity {
        OmxError::data_integrity(format!("{what}: constraint violation"))
    } else {
        OmxError::internal(format!("{what} failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_error_never_leaks_driver_text() {
        let err = db_error(sqlx::Error::PoolTimedOut, "insert_order");
        assert_eq!(err.kind(), omx_errors::ErrorKind::Internal);
        assert_eq!(err.message, "insert_order failed");
    }
}
