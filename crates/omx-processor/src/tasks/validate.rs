//! Validation and load tasks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use omx_domain::{AssetClass, CancelState, Execution, MachineSet, NewOrder, Order, OrderState};
use omx_errors::OmxError;
use omx_pipeline::{Task, TaskResult};
use omx_schemas::{CommandKind, CommandPayload};
use omx_validation::{execution_engine, order_engine, ValidationEngine, ValidationLimits};

use crate::context::OrderTaskContext;

// ---------------------------------------------------------------------------
// ValidateCommandTask
// ---------------------------------------------------------------------------

/// Envelope- and payload-shape validation, first in every pipeline.
///
/// For CREATE this also maps the payload onto a fresh domain [`Order`]
/// (with the order id left for AssignOrderId to mint), so the rule engine
/// downstream has a real entity to validate.
pub struct ValidateCommandTask;

#[async_trait]
impl Task<OrderTaskContext> for ValidateCommandTask {
    fn name(&self) -> &str {
        "ValidateCommand"
    }

    fn order(&self) -> i32 {
        10
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let correlation_id = ctx.command.correlation_id;
        let fail = |err: OmxError| TaskResult::failed(err.with_correlation_id(correlation_id));

        if ctx.command.session_id.trim().is_empty() {
            return fail(OmxError::validation("sessionId is required"));
        }

        match (&ctx.command.kind, &ctx.command.payload) {
            (CommandKind::Create, CommandPayload::Create(payload)) => {
                let cl_ord_id = match ctx.command.require_cl_ord_id() {
                    Ok(id) => id.to_string(),
                    Err(err) => return TaskResult::failed(err),
                };
                let order = Order::create(NewOrder {
                    order_id: String::new(),
                    session_id: ctx.command.session_id.clone(),
                    cl_ord_id,
                    parent_order_id: payload.parent_order_id.clone(),
                    root_order_id: None,
                    account: payload.account.clone(),
                    symbol: payload.symbol.clone(),
                    side: payload.side,
                    ord_type: payload.ord_type,
                    asset_class: payload.asset_class,
                    order_qty: payload.order_qty,
                    price: payload.price,
                    stop_px: payload.stop_px,
                    place_qty: payload.place_qty,
                    alloc_qty: payload.alloc_qty,
                    currency: payload.currency.clone(),
                });
                ctx.order = Some(order);
            }
            (CommandKind::Accept, CommandPayload::Accept(_))
            | (CommandKind::Expire, CommandPayload::Expire(_)) => {
                if let Err(err) = ctx.command.require_order_id() {
                    return TaskResult::failed(err);
                }
            }
            (CommandKind::Cancel, CommandPayload::Cancel(_)) => {
                if let Err(err) = ctx
                    .command
                    .require_order_id()
                    .and_then(|_| ctx.command.require_orig_cl_ord_id())
                {
                    return TaskResult::failed(err);
                }
            }
            (CommandKind::Replace, CommandPayload::Replace(payload)) => {
                if let Err(err) = ctx
                    .command
                    .require_order_id()
                    .and_then(|_| ctx.command.require_orig_cl_ord_id())
                {
                    return TaskResult::failed(err);
                }
                if payload.new_cl_ord_id.trim().is_empty() {
                    return fail(OmxError::validation("newClOrdId is required for REPLACE"));
                }
            }
            (CommandKind::Execute, CommandPayload::Execute(payload)) => {
                if let Err(err) = ctx.command.require_order_id() {
                    return TaskResult::failed(err);
                }
                if payload.exec_id.trim().is_empty() {
                    return fail(OmxError::validation("execID is required for EXECUTE"));
                }
                if payload.last_qty <= Decimal::ZERO {
                    return fail(OmxError::validation(format!(
                        "lastQty must be positive, got {}",
                        payload.last_qty
                    )));
                }
                if payload.last_px <= Decimal::ZERO {
                    return fail(OmxError::validation(format!(
                        "lastPx must be positive, got {}",
                        payload.last_px
                    )));
                }
            }
            (kind, _) => {
                return fail(OmxError::internal(format!(
                    "payload does not match command kind {}",
                    kind.as_str()
                )));
            }
        }

        TaskResult::success()
    }
}

// ---------------------------------------------------------------------------
// ValidateOrderTask
// ---------------------------------------------------------------------------

/// Runs the asset-class rule engine against the order under creation.
pub struct ValidateOrderTask {
    engines: HashMap<AssetClass, ValidationEngine<Order>>,
}

impl ValidateOrderTask {
    pub fn new(limits: &ValidationLimits) -> Self {
        let mut engines = HashMap::new();
        for asset_class in [AssetClass::Equity, AssetClass::Fx, AssetClass::FixedIncome] {
            engines.insert(asset_class, order_engine(asset_class, limits));
        }
        Self { engines }
    }

    fn validate(&self, order: &Order) -> Result<(), OmxError> {
        let engine = self
            .engines
            .get(&order.asset_class)
            .ok_or_else(|| OmxError::internal("no validation engine for asset class"))?;
        engine.validate(order).into_error()
    }
}

#[async_trait]
impl Task<OrderTaskContext> for ValidateOrderTask {
    fn name(&self) -> &str {
        "ValidateOrder"
    }

    fn order(&self) -> i32 {
        20
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let order = match ctx.order_ref() {
            Ok(order) => order,
            Err(err) => return TaskResult::failed(err),
        };
        match self.validate(order) {
            Ok(()) => TaskResult::success(),
            Err(err) => {
                let err = err.with_correlation_id(ctx.command.correlation_id);
                ctx.errors.push(err.clone());
                TaskResult::failed(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LoadOrderTask
// ---------------------------------------------------------------------------

/// Load the target order inside the command's transaction. Sets both
/// `original` (pristine, carries the expected `tx_nr`) and `order` (the
/// working copy).
pub struct LoadOrderTask;

#[async_trait]
impl Task<OrderTaskContext> for LoadOrderTask {
    fn name(&self) -> &str {
        "LoadOrder"
    }

    fn order(&self) -> i32 {
        20
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let correlation_id = ctx.command.correlation_id;
        let order_id = match ctx.command.require_order_id() {
            Ok(id) => id.to_string(),
            Err(err) => return TaskResult::failed(err),
        };
        let orig_cl_ord_id = ctx.command.orig_cl_ord_id.clone();

        let tx = match ctx.tx_mut() {
            Ok(tx) => tx,
            Err(err) => return TaskResult::failed(err),
        };

        let found = match omx_store::orders::find_by_order_id(&mut **tx, &order_id).await {
            Ok(found) => found,
            Err(err) => return TaskResult::failed(err),
        };

        let order = match found {
            Some(order) => order,
            None => {
                return TaskResult::failed(
                    OmxError::order_not_found(&order_id).with_correlation_id(correlation_id),
                )
            }
        };

        // CANCEL/REPLACE name the clOrdId they believe they are amending;
        // a mismatch means the caller is acting on stale lineage.
        if let Some(expected) = orig_cl_ord_id {
            if expected != order.cl_ord_id {
                return TaskResult::failed(
                    OmxError::validation(format!(
                        "origClOrdId {expected} does not match order {order_id} (clOrdId {})",
                        order.cl_ord_id
                    ))
                    .with_correlation_id(correlation_id),
                );
            }
        }

        ctx.original = Some(order.clone());
        ctx.order = Some(order);
        TaskResult::success()
    }
}

// ---------------------------------------------------------------------------
// ValidateCancelAllowedTask / ValidateReplaceAllowedTask
// ---------------------------------------------------------------------------

/// The order must be cancelable under the active machine and free of an
/// in-flight cancel/replace intent.
pub struct ValidateCancelAllowedTask {
    machines: Arc<MachineSet>,
}

impl ValidateCancelAllowedTask {
    pub fn new(machines: Arc<MachineSet>) -> Self {
        Self { machines }
    }
}

fn check_amendable(machines: &MachineSet, order: &Order) -> Result<(), OmxError> {
    if !machines
        .order
        .is_valid_transition(order.state, OrderState::Canceled)
    {
        return Err(OmxError::invalid_transition(order.state, OrderState::Canceled)
            .with_extension("order_id", order.order_id.clone()));
    }
    if order.cancel_state != CancelState::None {
        return Err(OmxError::conflict(&order.order_id, order.tx_nr)
            .with_extension("cancel_state", order.cancel_state.as_str().to_string()));
    }
    Ok(())
}

#[async_trait]
impl Task<OrderTaskContext> for ValidateCancelAllowedTask {
    fn name(&self) -> &str {
        "ValidateCancelAllowed"
    }

    fn order(&self) -> i32 {
        30
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let correlation_id = ctx.command.correlation_id;
        let order = match ctx.order_ref() {
            Ok(order) => order,
            Err(err) => return TaskResult::failed(err),
        };
        match check_amendable(&self.machines, order) {
            Ok(()) => TaskResult::success(),
            Err(err) => TaskResult::failed(err.with_correlation_id(correlation_id)),
        }
    }
}

/// Cancelability plus amendment sanity: the replacement quantity must cover
/// what has already filled.
pub struct ValidateReplaceAllowedTask {
    machines: Arc<MachineSet>,
}

impl ValidateReplaceAllowedTask {
    pub fn new(machines: Arc<MachineSet>) -> Self {
        Self { machines }
    }
}

#[async_trait]
impl Task<OrderTaskContext> for ValidateReplaceAllowedTask {
    fn name(&self) -> &str {
        "ValidateReplaceAllowed"
    }

    fn order(&self) -> i32 {
        30
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let correlation_id = ctx.command.correlation_id;
        let order = match ctx.order_ref() {
            Ok(order) => order.clone(),
            Err(err) => return TaskResult::failed(err),
        };
        if let Err(err) = check_amendable(&self.machines, &order) {
            return TaskResult::failed(err.with_correlation_id(correlation_id));
        }

        if let CommandPayload::Replace(payload) = &ctx.command.payload {
            if let Some(new_qty) = payload.order_qty {
                if new_qty <= Decimal::ZERO {
                    return TaskResult::failed(
                        OmxError::validation(format!(
                            "replacement orderQty must be positive, got {new_qty}"
                        ))
                        .with_correlation_id(correlation_id),
                    );
                }
                if new_qty < order.cum_qty {
                    return TaskResult::failed(
                        OmxError::validation(format!(
                            "replacement orderQty {new_qty} below filled cumQty {}",
                            order.cum_qty
                        ))
                        .with_correlation_id(correlation_id),
                    );
                }
            }
        }

        TaskResult::success()
    }
}

// ---------------------------------------------------------------------------
// ValidateExecutionTask
// ---------------------------------------------------------------------------

/// Builds the execution from the payload, probes the `exec_id` idempotency
/// key, and verifies the order can take the fill.
pub struct ValidateExecutionTask {
    engine: ValidationEngine<Order>,
}

impl ValidateExecutionTask {
    pub fn new() -> Self {
        Self {
            engine: execution_engine(),
        }
    }
}

impl Default for ValidateExecutionTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Task<OrderTaskContext> for ValidateExecutionTask {
    fn name(&self) -> &str {
        "ValidateExecution"
    }

    fn order(&self) -> i32 {
        30
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let correlation_id = ctx.command.correlation_id;
        let payload = match &ctx.command.payload {
            CommandPayload::Execute(payload) => payload.clone(),
            _ => return TaskResult::failed(OmxError::internal("EXECUTE payload expected")),
        };
        let order = match ctx.order_ref() {
            Ok(order) => order.clone(),
            Err(err) => return TaskResult::failed(err),
        };

        // Idempotency: a fill we have already applied replays as success
        // and disarms every mutation task downstream.
        let tx = match ctx.tx_mut() {
            Ok(tx) => tx,
            Err(err) => return TaskResult::failed(err),
        };
        match omx_store::executions::exists_by_exec_id(&mut **tx, &payload.exec_id).await {
            Ok(true) => {
                ctx.replayed = true;
                return TaskResult::success_with(format!(
                    "execID {} already applied; replay",
                    payload.exec_id
                ));
            }
            Ok(false) => {}
            Err(err) => return TaskResult::failed(err),
        }

        if let Err(err) = self.engine.validate(&order).into_error() {
            return TaskResult::failed(err.with_correlation_id(correlation_id));
        }

        if payload.last_qty > order.leaves_qty {
            return TaskResult::failed(
                OmxError::validation(format!(
                    "lastQty {} exceeds leavesQty {}",
                    payload.last_qty, order.leaves_qty
                ))
                .with_extension("exec_id", payload.exec_id.clone())
                .with_correlation_id(correlation_id),
            );
        }

        ctx.execution = Some(Execution::new(
            payload.exec_id,
            order.order_id.clone(),
            order.session_id.clone(),
            payload.last_qty,
            payload.last_px,
        ));
        TaskResult::success()
    }
}
