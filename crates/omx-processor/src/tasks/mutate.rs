//! Entity derivation tasks: id assignment, replacement construction and
//! fill application.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use omx_domain::{AssetClass, MachineSet, Order};
use omx_errors::OmxError;
use omx_pipeline::{Task, TaskResult};
use omx_schemas::CommandPayload;
use omx_validation::{order_engine, ValidationEngine, ValidationLimits};

use crate::context::OrderTaskContext;

// ---------------------------------------------------------------------------
// AssignOrderIdTask
// ---------------------------------------------------------------------------

/// Mint the business order id and resolve tree lineage. A child order
/// inherits its parent's root; roots point at themselves.
pub struct AssignOrderIdTask;

#[async_trait]
impl Task<OrderTaskContext> for AssignOrderIdTask {
    fn name(&self) -> &str {
        "AssignOrderId"
    }

    fn order(&self) -> i32 {
        30
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let correlation_id = ctx.command.correlation_id;
        let order_id = format!("O-{}", Uuid::new_v4());

        let parent_id = match &ctx.order {
            Some(order) => order.parent_order_id.clone(),
            None => return TaskResult::failed(OmxError::internal("no order in task context")),
        };

        let root_order_id = match parent_id {
            Some(parent_id) => {
                let tx = match ctx.tx_mut() {
                    Ok(tx) => tx,
                    Err(err) => return TaskResult::failed(err),
                };
                match omx_store::orders::find_by_order_id(&mut **tx, &parent_id).await {
                    Ok(Some(parent)) => parent.root_order_id,
                    Ok(None) => {
                        return TaskResult::failed(
                            OmxError::order_not_found(&parent_id)
                                .with_extension("relation", "parent_order_id".to_string())
                                .with_correlation_id(correlation_id),
                        )
                    }
                    Err(err) => return TaskResult::failed(err),
                }
            }
            None => order_id.clone(),
        };

        if let Some(order) = ctx.order.as_mut() {
            order.order_id = order_id;
            order.root_order_id = root_order_id;
        }
        TaskResult::success()
    }
}

// ---------------------------------------------------------------------------
// CreateReplacementTask
// ---------------------------------------------------------------------------

/// Build and validate the replacement order for a REPLACE command.
pub struct CreateReplacementTask {
    engines: HashMap<AssetClass, ValidationEngine<Order>>,
}

impl CreateReplacementTask {
    pub fn new(limits: &ValidationLimits) -> Self {
        let mut engines = HashMap::new();
        for asset_class in [AssetClass::Equity, AssetClass::Fx, AssetClass::FixedIncome] {
            engines.insert(asset_class, order_engine(asset_class, limits));
        }
        Self { engines }
    }
}

#[async_trait]
impl Task<OrderTaskContext> for CreateReplacementTask {
    fn name(&self) -> &str {
        "CreateReplacement"
    }

    fn order(&self) -> i32 {
        35
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let correlation_id = ctx.command.correlation_id;
        let payload = match &ctx.command.payload {
            CommandPayload::Replace(payload) => payload.clone(),
            _ => return TaskResult::failed(OmxError::internal("REPLACE payload expected")),
        };
        let orig = match ctx.order_ref() {
            Ok(order) => order.clone(),
            Err(err) => return TaskResult::failed(err),
        };

        let replacement = orig.build_replacement(
            format!("O-{}", Uuid::new_v4()),
            payload.new_cl_ord_id,
            payload.order_qty,
            payload.price,
        );

        let engine = match self.engines.get(&replacement.asset_class) {
            Some(engine) => engine,
            None => {
                return TaskResult::failed(OmxError::internal(
                    "no validation engine for asset class",
                ))
            }
        };
        if let Err(err) = engine.validate(&replacement).into_error() {
            return TaskResult::failed(err.with_correlation_id(correlation_id));
        }

        ctx.replacement = Some(replacement);
        TaskResult::success()
    }
}

// ---------------------------------------------------------------------------
// ApplyExecutionTask
// ---------------------------------------------------------------------------

/// Apply the validated execution to the order and stamp the execution with
/// the post-apply snapshot. The derived lifecycle edge is re-checked
/// against the machine. Invariant: no transition is ever applied that
/// `is_valid_transition` would refuse.
pub struct ApplyExecutionTask {
    machines: Arc<MachineSet>,
}

impl ApplyExecutionTask {
    pub fn new(machines: Arc<MachineSet>) -> Self {
        Self { machines }
    }
}

#[async_trait]
impl Task<OrderTaskContext> for ApplyExecutionTask {
    fn name(&self) -> &str {
        "ApplyExecutionToOrder"
    }

    fn order(&self) -> i32 {
        40
    }

    fn precondition(&self, ctx: &OrderTaskContext) -> bool {
        !ctx.replayed
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let correlation_id = ctx.command.correlation_id;
        let order = match ctx.order_ref() {
            Ok(order) => order.clone(),
            Err(err) => return TaskResult::failed(err),
        };
        let execution = match ctx.execution.clone() {
            Some(execution) => execution,
            None => return TaskResult::failed(OmxError::internal("no execution in task context")),
        };

        let next = match order.apply_execution(&execution) {
            Ok(next) => next,
            Err(err) => return TaskResult::failed(err.with_correlation_id(correlation_id)),
        };

        if !self
            .machines
            .order
            .is_valid_transition(order.state, next.state)
        {
            return TaskResult::failed(
                OmxError::invalid_transition(order.state, next.state)
                    .with_extension("order_id", order.order_id.clone())
                    .with_correlation_id(correlation_id),
            );
        }

        ctx.execution = Some(execution.applied(next.cum_qty, next.avg_px));
        ctx.order = Some(next);
        TaskResult::success()
    }
}
