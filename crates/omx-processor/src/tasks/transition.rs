//! The state-transition task.
//!
//! Every lifecycle edge a pipeline takes goes through here (fills excepted:
//! ApplyExecution derives its edge from the quantities and re-checks it
//! against the machine). An illegal edge is a FAILED result with
//! `OMS-STATE-001`, never a silent mutation.

use std::sync::Arc;

use async_trait::async_trait;

use omx_domain::{MachineSet, MachineVariant, Order, OrderState};
use omx_errors::OmxError;
use omx_pipeline::{Task, TaskResult};
use omx_schemas::CommandPayload;

use crate::context::OrderTaskContext;

/// Which lifecycle move this pipeline performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionGoal {
    /// CREATE: entity creation must enter through an initial state.
    CreateEntry,
    /// ACCEPT: NEW/UNACK -> LIVE, or -> REJECTED on a reject verdict.
    Accept,
    /// CANCEL: working state -> CANCELED.
    Cancel,
    /// EXPIRE: working state -> EXPIRED.
    Expire,
    /// REPLACE: the replaced order -> CANCELED, the replacement enters NEW.
    ReplaceOrig,
}

pub struct StateTransitionTask {
    machines: Arc<MachineSet>,
    goal: TransitionGoal,
}

impl StateTransitionTask {
    pub fn new(machines: Arc<MachineSet>, goal: TransitionGoal) -> Self {
        Self { machines, goal }
    }

    fn accept_target(&self, ctx: &OrderTaskContext) -> (OrderState, Option<String>) {
        match &ctx.command.payload {
            CommandPayload::Accept(payload) if payload.reject => {
                (OrderState::Rejected, payload.reject_reason.clone())
            }
            _ => (OrderState::Live, None),
        }
    }

    fn apply(&self, ctx: &OrderTaskContext, order: &Order) -> Result<Order, OmxError> {
        let machine = &self.machines.order;
        match self.goal {
            TransitionGoal::CreateEntry => {
                machine.check(None, order.state).map_err(|e| {
                    OmxError::invalid_transition("(none)", order.state)
                        .with_extension("reason", e.reason)
                })?;
                Ok(order.clone())
            }
            TransitionGoal::Accept => {
                let (target, _reason) = self.accept_target(ctx);
                let next = match (self.machines.variant, order.state) {
                    // Standard acks through UNACK on the way to the verdict.
                    (MachineVariant::Standard, OrderState::New) => {
                        let report =
                            machine.validate_sequence(order.state, &[OrderState::Unack, target]);
                        if let Some((from, to)) = report.failed_edge {
                            return Err(OmxError::invalid_transition(from, to));
                        }
                        target
                    }
                    _ => machine
                        .check(Some(order.state), target)
                        .map_err(|e| OmxError::invalid_transition(order.state, target)
                            .with_extension("reason", e.reason))?,
                };
                Ok(match next {
                    OrderState::Rejected => order.mark_rejected(),
                    _ => order.mark_live(),
                })
            }
            TransitionGoal::Cancel | TransitionGoal::ReplaceOrig => {
                machine
                    .check(Some(order.state), OrderState::Canceled)
                    .map_err(|e| {
                        OmxError::invalid_transition(order.state, OrderState::Canceled)
                            .with_extension("reason", e.reason)
                    })?;
                Ok(order.mark_canceled())
            }
            TransitionGoal::Expire => {
                machine
                    .check(Some(order.state), OrderState::Expired)
                    .map_err(|e| {
                        OmxError::invalid_transition(order.state, OrderState::Expired)
                            .with_extension("reason", e.reason)
                    })?;
                Ok(order.mark_expired())
            }
        }
    }
}

#[async_trait]
impl Task<OrderTaskContext> for StateTransitionTask {
    fn name(&self) -> &str {
        "StateTransition"
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

        match self.apply(ctx, &order) {
            Ok(next) => {
                // The replacement itself must be a legal entry.
                if self.goal == TransitionGoal::ReplaceOrig {
                    if let Some(replacement) = &ctx.replacement {
                        if let Err(e) = self.machines.order.check(None, replacement.state) {
                            return TaskResult::failed(
                                OmxError::invalid_transition("(none)", replacement.state)
                                    .with_extension("reason", e.reason)
                                    .with_correlation_id(correlation_id),
                            );
                        }
                    }
                }
                ctx.order = Some(next);
                TaskResult::success()
            }
            Err(err) => TaskResult::failed(err.with_correlation_id(correlation_id)),
        }
    }
}
