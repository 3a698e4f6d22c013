//! Order persistence.
//!
//! The store exclusively owns `orders` rows; processors borrow them
//! transactionally. Updates are version-checked: the SQL bumps `tx_nr`
//! itself (`tx_nr = tx_nr + 1 ... where tx_nr = $expected`), so a stale
//! writer matches zero rows and surfaces as Conflict.
//!
//! Write functions take the processor's open [`PgTx`]; reads take any
//! executor so they work against the pool or inside a transaction.

use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};

use omx_domain::{AssetClass, CancelState, OrdType, Order, OrderState, Side};
use omx_errors::OmxError;

use crate::{db_error, is_unique_constraint_violation};

/// The transaction type the command processors own.
pub type PgTx = sqlx::Transaction<'static, sqlx::Postgres>;

const ORDER_COLUMNS: &str = "order_nr, order_id, session_id, cl_ord_id, orig_cl_ord_id, \
     parent_order_id, root_order_id, account, symbol, side, ord_type, asset_class, \
     order_qty, cum_qty, leaves_qty, place_qty, alloc_qty, price, stop_px, avg_px, \
     currency, state, cancel_state, tx_nr, created_at, updated_at";

pub(crate) fn row_to_order(row: &PgRow) -> Result<Order, OmxError> {
    fn read(what: &str, e: sqlx::Error) -> OmxError {
        tracing::error!(column = what, error = %e, "order row decode failed");
        OmxError::data_integrity(format!("orders.{what}: undecodable value"))
    }

    Ok(Order {
        order_nr: Some(row.try_get("order_nr").map_err(|e| read("order_nr", e))?),
        order_id: row.try_get("order_id").map_err(|e| read("order_id", e))?,
        session_id: row.try_get("session_id").map_err(|e| read("session_id", e))?,
        cl_ord_id: row.try_get("cl_ord_id").map_err(|e| read("cl_ord_id", e))?,
        orig_cl_ord_id: row
            .try_get("orig_cl_ord_id")
            .map_err(|e| read("orig_cl_ord_id", e))?,
        parent_order_id: row
            .try_get("parent_order_id")
            .map_err(|e| read("parent_order_id", e))?,
        root_order_id: row
            .try_get("root_order_id")
            .map_err(|e| read("root_order_id", e))?,
        account: row.try_get("account").map_err(|e| read("account", e))?,
        symbol: row.try_get("symbol").map_err(|e| read("symbol", e))?,
        side: Side::parse(&row.try_get::<String, _>("side").map_err(|e| read("side", e))?)?,
        ord_type: OrdType::parse(
            &row.try_get::<String, _>("ord_type")
                .map_err(|e| read("ord_type", e))?,
        )?,
        asset_class: AssetClass::parse(
            &row.try_get::<String, _>("asset_class")
                .map_err(|e| read("asset_class", e))?,
        )?,
        order_qty: row.try_get("order_qty").map_err(|e| read("order_qty", e))?,
        cum_qty: row.try_get("cum_qty").map_err(|e| read("cum_qty", e))?,
        leaves_qty: row.try_get("leaves_qty").map_err(|e| read("leaves_qty", e))?,
        place_qty: row.try_get("place_qty").map_err(|e| read("place_qty", e))?,
        alloc_qty: row.try_get("alloc_qty").map_err(|e| read("alloc_qty", e))?,
        price: row.try_get("price").map_err(|e| read("price", e))?,
        stop_px: row.try_get("stop_px").map_err(|e| read("stop_px", e))?,
        avg_px: row.try_get("avg_px").map_err(|e| read("avg_px", e))?,
        currency: row.try_get("currency").map_err(|e| read("currency", e))?,
        state: OrderState::parse(
            &row.try_get::<String, _>("state")
                .map_err(|e| read("state", e))?,
        )?,
        cancel_state: CancelState::parse(
            &row.try_get::<String, _>("cancel_state")
                .map_err(|e| read("cancel_state", e))?,
        )?,
        tx_nr: row.try_get("tx_nr").map_err(|e| read("tx_nr", e))?,
        created_at: row.try_get("created_at").map_err(|e| read("created_at", e))?,
        updated_at: row.try_get("updated_at").map_err(|e| read("updated_at", e))?,
    })
}

/// Insert a fresh order row and return it with its assigned `order_nr`.
///
/// # Errors
/// `Duplicate` when `(session_id, cl_ord_id)` or `order_id` already exists.
/// A unique violation aborts the enclosing transaction; the CREATE
/// processor rolls back and re-probes for the idempotent-replay answer.
pub async fn insert_order(tx: &mut PgTx, order: &Order) -> Result<Order, OmxError> {
    let row = sqlx::query(&format!(
        r#"
        insert into orders (
          order_id, session_id, cl_ord_id, orig_cl_ord_id, parent_order_id,
          root_order_id, account, symbol, side, ord_type, asset_class,
          order_qty, cum_qty, leaves_qty, place_qty, alloc_qty, price,
          stop_px, avg_px, currency, state, cancel_state, tx_nr
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
          $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23
        )
        returning {ORDER_COLUMNS}
        "#
    ))
    .bind(&order.order_id)
    .bind(&order.session_id)
    .bind(&order.cl_ord_id)
    .bind(&order.orig_cl_ord_id)
    .bind(&order.parent_order_id)
    .bind(&order.root_order_id)
    .bind(&order.account)
    .bind(&order.symbol)
    .bind(order.side.as_str())
    .bind(order.ord_type.as_str())
    .bind(order.asset_class.as_str())
    .bind(order.order_qty)
    .bind(order.cum_qty)
    .bind(order.leaves_qty)
    .bind(order.place_qty)
    .bind(order.alloc_qty)
    .bind(order.price)
    .bind(order.stop_px)
    .bind(order.avg_px)
    .bind(&order.currency)
    .bind(order.state.as_str())
    .bind(order.cancel_state.as_str())
    .bind(order.tx_nr)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_constraint_violation(&e, "uq_orders_session_clordid")
            || is_unique_constraint_violation(&e, "uq_orders_order_id")
        {
            OmxError::duplicate(&order.session_id, &order.cl_ord_id)
        } else {
            db_error(e, "insert_order")
        }
    })?;

    row_to_order(&row)
}

/// Version-checked update of the mutable order columns.
///
/// Returns the post-update row (with the bumped `tx_nr`).
///
/// # Errors
/// `Conflict` when the row exists but `tx_nr` moved on; `NotFound` when no
/// such order exists.
pub async fn update_order(
    tx: &mut PgTx,
    order: &Order,
    expected_tx_nr: i64,
) -> Result<Order, OmxError> {
    let row = sqlx::query(&format!(
        r#"
        update orders
           set cum_qty      = $3,
               leaves_qty   = $4,
               avg_px       = $5,
               state        = $6,
               cancel_state = $7,
               alloc_qty    = $8,
               place_qty    = $9,
               tx_nr        = tx_nr + 1,
               updated_at   = now()
         where order_id = $1
           and tx_nr    = $2
        returning {ORDER_COLUMNS}
        "#
    ))
    .bind(&order.order_id)
    .bind(expected_tx_nr)
    .bind(order.cum_qty)
    .bind(order.leaves_qty)
    .bind(order.avg_px)
    .bind(order.state.as_str())
    .bind(order.cancel_state.as_str())
    .bind(order.alloc_qty)
    .bind(order.place_qty)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| db_error(e, "update_order"))?;

    match row {
        Some(row) => row_to_order(&row),
        None => {
            // Zero rows: stale version or missing order. Disambiguate.
            let exists: Option<(i64,)> =
                sqlx::query_as("select tx_nr from orders where order_id = $1")
                    .bind(&order.order_id)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(|e| db_error(e, "update_order probe"))?;

            match exists {
                Some((actual,)) => Err(OmxError::conflict(&order.order_id, expected_tx_nr)
                    .with_extension("actual_tx_nr", actual.to_string())),
                None => Err(OmxError::order_not_found(&order.order_id)),
            }
        }
    }
}

/// Fetch by business key.
pub async fn find_by_order_id<'e>(
    executor: impl PgExecutor<'e>,
    order_id: &str,
) -> Result<Option<Order>, OmxError> {
    let row = sqlx::query(&format!(
        "select {ORDER_COLUMNS} from orders where order_id = $1"
    ))
    .bind(order_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| db_error(e, "find_by_order_id"))?;

    row.as_ref().map(row_to_order).transpose()
}

/// Fetch by the idempotency natural key.
pub async fn find_by_session_and_cl_ord_id<'e>(
    executor: impl PgExecutor<'e>,
    session_id: &str,
    cl_ord_id: &str,
) -> Result<Option<Order>, OmxError> {
    let row = sqlx::query(&format!(
        "select {ORDER_COLUMNS} from orders where session_id = $1 and cl_ord_id = $2"
    ))
    .bind(session_id)
    .bind(cl_ord_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| db_error(e, "find_by_session_and_cl_ord_id"))?;

    row.as_ref().map(row_to_order).transpose()
}

pub async fn exists_by_session_and_cl_ord_id<'e>(
    executor: impl PgExecutor<'e>,
    session_id: &str,
    cl_ord_id: &str,
) -> Result<bool, OmxError> {
    let (exists,): (bool,) = sqlx::query_as(
        "select exists (select 1 from orders where session_id = $1 and cl_ord_id = $2)",
    )
    .bind(session_id)
    .bind(cl_ord_id)
    .fetch_one(executor)
    .await
    .map_err(|e| db_error(e, "exists_by_session_and_cl_ord_id"))?;

    Ok(exists)
}

/// Direct children of an order, in creation order.
pub async fn find_children<'e>(
    executor: impl PgExecutor<'e>,
    parent_order_id: &str,
) -> Result<Vec<Order>, OmxError> {
    let rows = sqlx::query(&format!(
        "select {ORDER_COLUMNS} from orders where parent_order_id = $1 order by order_nr asc"
    ))
    .bind(parent_order_id)
    .fetch_all(executor)
    .await
    .map_err(|e| db_error(e, "find_children"))?;

    rows.iter().map(row_to_order).collect()
}

/// Every order in a replacement tree (root included), in creation order.
/// Tree traversal is application-level; there is no referential constraint.
pub async fn find_tree<'e>(
    executor: impl PgExecutor<'e>,
    root_order_id: &str,
) -> Result<Vec<Order>, OmxError> {
    let rows = sqlx::query(&format!(
        "select {ORDER_COLUMNS} from orders where root_order_id = $1 order by order_nr asc"
    ))
    .bind(root_order_id)
    .fetch_all(executor)
    .await
    .map_err(|e| db_error(e, "find_tree"))?;

    rows.iter().map(row_to_order).collect()
}
