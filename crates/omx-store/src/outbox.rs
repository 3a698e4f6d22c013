//! Transactional outbox.
//!
//! Rows are written in the same transaction as the entity mutation and the
//! event append; the publisher is their only consumer. The claim protocol:
//!
//! 1. [`claim_batch`] opens a transaction and locks the oldest rows with
//!    `FOR UPDATE SKIP LOCKED`; concurrent publishers never see each
//!    other's rows.
//! 2. The publisher publishes each row, then [`delete_rows`] + commit.
//! 3. On failure it drops the batch (rollback releases the locks) and
//!    [`record_attempt`] bumps `attempt_count` in its own short
//!    transaction so the failure survives the rollback.
//!
//! No row is ever dropped: rows leave via delete-on-ack or an explicit
//! [`quarantine`] move.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgExecutor, PgPool, Row};

use omx_errors::OmxError;

use crate::db_error;
use crate::orders::PgTx;

#[derive(Debug, Clone)]
pub struct NewOutboxRow {
    pub order_id: String,
    pub topic: String,
    /// Serialized event envelope.
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: i64,
    pub order_id: String,
    pub topic: String,
    pub payload: Value,
    pub attempt_count: i32,
    pub created_at: DateTime<Utc>,
}

/// A claimed batch: rows plus the transaction holding their row locks.
/// Dropping the batch without [`commit`](Self::commit) rolls back and
/// releases every row unchanged.
pub struct OutboxBatch {
    pub tx: PgTx,
    pub rows: Vec<OutboxRow>,
}

impl OutboxBatch {
    pub async fn commit(self) -> Result<(), OmxError> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_error(e, "outbox batch commit"))
    }
}

/// Insert one pending row inside the processor's transaction.
pub async fn insert_outbox(tx: &mut PgTx, row: &NewOutboxRow) -> Result<i64, OmxError> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into order_outbox (order_id, topic, payload)
        values ($1, $2, $3)
        returning id
        "#,
    )
    .bind(&row.order_id)
    .bind(&row.topic)
    .bind(&row.payload)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| db_error(e, "insert_outbox"))?;

    Ok(id)
}

fn row_to_outbox(row: &sqlx::postgres::PgRow) -> Result<OutboxRow, OmxError> {
    Ok(OutboxRow {
        id: row.try_get("id").map_err(|e| db_error(e, "outbox id"))?,
        order_id: row
            .try_get("order_id")
            .map_err(|e| db_error(e, "outbox order_id"))?,
        topic: row
            .try_get("topic")
            .map_err(|e| db_error(e, "outbox topic"))?,
        payload: row
            .try_get("payload")
            .map_err(|e| db_error(e, "outbox payload"))?,
        attempt_count: row
            .try_get("attempt_count")
            .map_err(|e| db_error(e, "outbox attempt_count"))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| db_error(e, "outbox created_at"))?,
    })
}

/// Claim up to `batch_size` rows in ascending `id` order.
///
/// Rows held by another publisher's open batch are skipped, not waited on.
/// An empty `rows` vec means nothing is claimable right now.
pub async fn claim_batch(pool: &PgPool, batch_size: i64) -> Result<OutboxBatch, OmxError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| db_error(e, "outbox claim begin"))?;

    let rows = sqlx::query(
        r#"
        select id, order_id, topic, payload, attempt_count, created_at
        from order_outbox
        order by id asc
        limit $1
        for update skip locked
        "#,
    )
    .bind(batch_size)
    .fetch_all(&mut *tx)
    .await
    .map_err(|e| db_error(e, "outbox claim_batch"))?;

    let rows = rows
        .iter()
        .map(row_to_outbox)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(OutboxBatch { tx, rows })
}

/// Delete published rows inside the claim transaction.
pub async fn delete_rows(tx: &mut PgTx, ids: &[i64]) -> Result<u64, OmxError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query("delete from order_outbox where id = any($1)")
        .bind(ids)
        .execute(&mut **tx)
        .await
        .map_err(|e| db_error(e, "outbox delete_rows"))?;

    Ok(result.rows_affected())
}

/// Bump `attempt_count` after a failed publish round. Runs against the
/// pool in its own statement, after the claim transaction rolled back.
pub async fn record_attempt(pool: &PgPool, ids: &[i64]) -> Result<(), OmxError> {
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query("update order_outbox set attempt_count = attempt_count + 1 where id = any($1)")
        .bind(ids)
        .execute(pool)
        .await
        .map_err(|e| db_error(e, "outbox record_attempt"))?;

    Ok(())
}

/// Move a poisoned row to the quarantine table (operator intervention
/// required). Atomic: the copy and the delete share one transaction.
pub async fn quarantine(pool: &PgPool, id: i64, reason: &str) -> Result<bool, OmxError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| db_error(e, "outbox quarantine begin"))?;

    let moved = sqlx::query(
        r#"
        insert into order_outbox_quarantine
            (id, order_id, topic, payload, attempt_count, reason, created_at)
        select id, order_id, topic, payload, attempt_count, $2, created_at
        from order_outbox
        where id = $1
        on conflict (id) do nothing
        "#,
    )
    .bind(id)
    .bind(reason)
    .execute(&mut *tx)
    .await
    .map_err(|e| db_error(e, "outbox quarantine insert"))?;

    sqlx::query("delete from order_outbox where id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(e, "outbox quarantine delete"))?;

    tx.commit()
        .await
        .map_err(|e| db_error(e, "outbox quarantine commit"))?;

    Ok(moved.rows_affected() > 0)
}

/// Pending-row count; the backpressure gauge operators alert on.
pub async fn backlog<'e>(executor: impl PgExecutor<'e>) -> Result<i64, OmxError> {
    let (count,): (i64,) = sqlx::query_as("select count(*)::bigint from order_outbox")
        .fetch_one(executor)
        .await
        .map_err(|e| db_error(e, "outbox backlog"))?;

    Ok(count)
}

/// Age in seconds of the oldest pending row, if any.
pub async fn oldest_age_seconds<'e>(executor: impl PgExecutor<'e>) -> Result<Option<i64>, OmxError> {
    let row: Option<(f64,)> = sqlx::query_as(
        "select extract(epoch from now() - min(created_at))::float8 from order_outbox \
         having min(created_at) is not null",
    )
    .fetch_optional(executor)
    .await
    .map_err(|e| db_error(e, "outbox oldest_age"))?;

    Ok(row.map(|(secs,)| secs as i64))
}

/// Pending rows in publish order, without locking (monitoring/tests).
pub async fn list_pending<'e>(
    executor: impl PgExecutor<'e>,
    limit: i64,
) -> Result<Vec<OutboxRow>, OmxError> {
    let rows = sqlx::query(
        r#"
        select id, order_id, topic, payload, attempt_count, created_at
        from order_outbox
        order by id asc
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(executor)
    .await
    .map_err(|e| db_error(e, "outbox list_pending"))?;

    rows.iter().map(row_to_outbox).collect()
}
