//! Append-only event log.
//!
//! One row per state-changing command, written in the same transaction as
//! the entity mutation. Rows are never updated or deleted by the core;
//! `id` is the per-store total order and the `event_id` consumers
//! deduplicate on.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgExecutor, Row};
use uuid::Uuid;

use omx_errors::OmxError;
use omx_schemas::OrderEventKind;

use crate::db_error;
use crate::orders::PgTx;

#[derive(Debug, Clone)]
pub struct NewOrderEvent {
    pub order_id: String,
    pub kind: OrderEventKind,
    /// Set for fill events.
    pub exec_id: Option<String>,
    pub correlation_id: Uuid,
    /// Triggering command and resulting state delta, as structured JSON.
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub order_id: String,
    pub kind: OrderEventKind,
    pub exec_id: Option<String>,
    pub correlation_id: Uuid,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Append one event; returns the row with its assigned sequence id.
pub async fn append_order_event(tx: &mut PgTx, event: &NewOrderEvent) -> Result<EventRow, OmxError> {
    let row = sqlx::query(
        r#"
        insert into order_events (order_id, event, exec_id, correlation_id, payload)
        values ($1, $2, $3, $4, $5)
        returning id, created_at
        "#,
    )
    .bind(&event.order_id)
    .bind(event.kind.as_str())
    .bind(&event.exec_id)
    .bind(event.correlation_id)
    .bind(&event.payload)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| db_error(e, "append_order_event"))?;

    Ok(EventRow {
        id: row
            .try_get("id")
            .map_err(|e| db_error(e, "append_order_event id"))?,
        order_id: event.order_id.clone(),
        kind: event.kind,
        exec_id: event.exec_id.clone(),
        correlation_id: event.correlation_id,
        payload: event.payload.clone(),
        created_at: row
            .try_get("created_at")
            .map_err(|e| db_error(e, "append_order_event created_at"))?,
    })
}

/// All events for an order, in log order.
pub async fn list_for_order<'e>(
    executor: impl PgExecutor<'e>,
    order_id: &str,
) -> Result<Vec<EventRow>, OmxError> {
    let rows = sqlx::query(
        r#"
        select id, order_id, event, exec_id, correlation_id, payload, created_at
        from order_events
        where order_id = $1
        order by id asc
        "#,
    )
    .bind(order_id)
    .fetch_all(executor)
    .await
    .map_err(|e| db_error(e, "list_for_order events"))?;

    rows.into_iter()
        .map(|row| {
            Ok(EventRow {
                id: row.try_get("id").map_err(|e| db_error(e, "events id"))?,
                order_id: row
                    .try_get("order_id")
                    .map_err(|e| db_error(e, "events order_id"))?,
                kind: OrderEventKind::parse(
                    &row.try_get::<String, _>("event")
                        .map_err(|e| db_error(e, "events event"))?,
                )?,
                exec_id: row
                    .try_get("exec_id")
                    .map_err(|e| db_error(e, "events exec_id"))?,
                correlation_id: row
                    .try_get("correlation_id")
                    .map_err(|e| db_error(e, "events correlation_id"))?,
                payload: row
                    .try_get("payload")
                    .map_err(|e| db_error(e, "events payload"))?,
                created_at: row
                    .try_get("created_at")
                    .map_err(|e| db_error(e, "events created_at"))?,
            })
        })
        .collect()
}

/// Count events of one kind for an order (idempotency checks and tests).
pub async fn count_for_order<'e>(
    executor: impl PgExecutor<'e>,
    order_id: &str,
    kind: OrderEventKind,
) -> Result<i64, OmxError> {
    let (count,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from order_events where order_id = $1 and event = $2",
    )
    .bind(order_id)
    .bind(kind.as_str())
    .fetch_one(executor)
    .await
    .map_err(|e| db_error(e, "count_for_order"))?;

    Ok(count)
}
