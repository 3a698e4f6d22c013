//! Execution persistence.
//!
//! `exec_id` is globally unique and is the idempotency key for fills:
//! the insert uses `on conflict do nothing`, and a `None` return tells the
//! FILL processor the execution was already applied.

use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};

use omx_domain::{Execution, ExecutionState};
use omx_errors::OmxError;

use crate::db_error;
use crate::orders::PgTx;

const EXECUTION_COLUMNS: &str =
    "exec_nr, exec_id, order_id, session_id, last_qty, last_px, cum_qty, avg_px, state, \
     transact_time, created_at";

/// Outcome of an execution insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionInsert {
    Inserted,
    /// `exec_id` already present: idempotent replay, nothing written.
    AlreadyApplied,
}

fn row_to_execution(row: &PgRow) -> Result<Execution, OmxError> {
    fn read(what: &str, e: sqlx::Error) -> OmxError {
        tracing::error!(column = what, error = %e, "execution row decode failed");
        OmxError::data_integrity(format!("executions.{what}: undecodable value"))
    }

    Ok(Execution {
        exec_id: row.try_get("exec_id").map_err(|e| read("exec_id", e))?,
        order_id: row.try_get("order_id").map_err(|e| read("order_id", e))?,
        session_id: row.try_get("session_id").map_err(|e| read("session_id", e))?,
        last_qty: row.try_get("last_qty").map_err(|e| read("last_qty", e))?,
        last_px: row.try_get("last_px").map_err(|e| read("last_px", e))?,
        cum_qty: row.try_get("cum_qty").map_err(|e| read("cum_qty", e))?,
        avg_px: row.try_get("avg_px").map_err(|e| read("avg_px", e))?,
        state: ExecutionState::parse(
            &row.try_get::<String, _>("state")
                .map_err(|e| read("state", e))?,
        )?,
        transact_time: row
            .try_get("transact_time")
            .map_err(|e| read("transact_time", e))?,
    })
}

/// Insert an execution row, deduplicated on `exec_id`.
pub async fn insert_execution(
    tx: &mut PgTx,
    execution: &Execution,
) -> Result<ExecutionInsert, OmxError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into executions (
          exec_id, order_id, session_id, last_qty, last_px, cum_qty, avg_px,
          state, transact_time
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        on conflict (exec_id) do nothing
        returning exec_nr
        "#,
    )
    .bind(&execution.exec_id)
    .bind(&execution.order_id)
    .bind(&execution.session_id)
    .bind(execution.last_qty)
    .bind(execution.last_px)
    .bind(execution.cum_qty)
    .bind(execution.avg_px)
    .bind(execution.state.as_str())
    .bind(execution.transact_time)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| db_error(e, "insert_execution"))?;

    Ok(if row.is_some() {
        ExecutionInsert::Inserted
    } else {
        ExecutionInsert::AlreadyApplied
    })
}

pub async fn find_by_exec_id<'e>(
    executor: impl PgExecutor<'e>,
    exec_id: &str,
) -> Result<Option<Execution>, OmxError> {
    let row = sqlx::query(&format!(
        "select {EXECUTION_COLUMNS} from executions where exec_id = $1"
    ))
    .bind(exec_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| db_error(e, "find_by_exec_id"))?;

    row.as_ref().map(row_to_execution).transpose()
}

pub async fn exists_by_exec_id<'e>(
    executor: impl PgExecutor<'e>,
    exec_id: &str,
) -> Result<bool, OmxError> {
    let (exists,): (bool,) =
        sqlx::query_as("select exists (select 1 from executions where exec_id = $1)")
            .bind(exec_id)
            .fetch_one(executor)
            .await
            .map_err(|e| db_error(e, "exists_by_exec_id"))?;

    Ok(exists)
}

/// All executions for an order in application order.
pub async fn list_for_order<'e>(
    executor: impl PgExecutor<'e>,
    order_id: &str,
) -> Result<Vec<Execution>, OmxError> {
    let rows = sqlx::query(&format!(
        "select {EXECUTION_COLUMNS} from executions where order_id = $1 order by exec_nr asc"
    ))
    .bind(order_id)
    .fetch_all(executor)
    .await
    .map_err(|e| db_error(e, "list_for_order"))?;

    rows.iter().map(row_to_execution).collect()
}
