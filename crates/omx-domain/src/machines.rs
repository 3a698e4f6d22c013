//! Prebuilt lifecycle machines.
//!
//! Built once at startup and shared read-only. Two order variants exist:
//!
//! ```text
//! standard:    NEW -> UNACK -> LIVE -> {FILLED, CANCELED, REJECTED*} -> CLOSED
//!                                  \-> PARTIALLY_FILLED -> ...    \-> EXPIRED
//! simplified:  NEW ---------> LIVE -> ...   (UNACK skipped)
//! ```
//!
//! (* REJECTED is reached from UNACK; EXPIRED is terminal.)
//!
//! The cancel/replace intent machine is deliberately separate from the
//! primary lifecycle: an in-flight PCXL/PMOD intent never constrains which
//! primary edges are legal.

use omx_errors::OmxError;
use omx_statemachine::{StateMachine, StateMachineBuilder};

use crate::types::{CancelState, ExecutionState, OrderState, QuoteState};

// ---------------------------------------------------------------------------
// MachineVariant
// ---------------------------------------------------------------------------

/// Which order lifecycle the deployment runs (`state_machine.variant`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineVariant {
    Standard,
    Simplified,
}

impl MachineVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineVariant::Standard => "standard",
            MachineVariant::Simplified => "simplified",
        }
    }

    pub fn parse(s: &str) -> Result<Self, OmxError> {
        match s {
            "standard" => Ok(MachineVariant::Standard),
            "simplified" => Ok(MachineVariant::Simplified),
            other => Err(OmxError::validation(format!(
                "invalid state machine variant: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Order lifecycle
// ---------------------------------------------------------------------------

/// Build the order lifecycle machine for a variant.
pub fn order_lifecycle(variant: MachineVariant) -> StateMachine<OrderState> {
    use OrderState::*;

    let mut builder = StateMachineBuilder::new(format!("order-{}", variant.as_str()))
        .add_initial_state(New)
        // Working-order edges.
        .add_transition(Live, PartiallyFilled)
        .add_transition(Live, Filled)
        .add_transition(Live, Canceled)
        .add_transition(Live, Expired)
        // Repeated partials keep the order in PARTIALLY_FILLED.
        .add_transition(PartiallyFilled, PartiallyFilled)
        .add_transition(PartiallyFilled, Filled)
        .add_transition(PartiallyFilled, Canceled)
        .add_transition(PartiallyFilled, Expired)
        // Done states drain into CLOSED.
        .add_transition(Filled, Closed)
        .add_transition(Canceled, Closed)
        .add_transition(Rejected, Closed)
        .add_terminal_state(Closed)
        .add_terminal_state(Expired);

    builder = match variant {
        MachineVariant::Standard => builder
            .add_transition(New, Unack)
            .add_transition(Unack, Live)
            .add_transition(Unack, Rejected)
            .add_transition(Unack, Canceled),
        // Simplified keeps the session reject path but skips the UNACK hop.
        MachineVariant::Simplified => builder
            .add_transition(New, Live)
            .add_transition(New, Rejected),
    };

    builder.build()
}

// ---------------------------------------------------------------------------
// Cancel/replace intent
// ---------------------------------------------------------------------------

/// Second, independent machine for the in-flight cancel/replace intent.
pub fn cancel_intent() -> StateMachine<CancelState> {
    use CancelState::*;

    StateMachineBuilder::new("cancel-intent")
        .add_initial_state(None)
        .add_transition(None, PendingCancel)
        .add_transition(None, PendingReplace)
        .add_transition(PendingCancel, None)
        .add_transition(PendingReplace, None)
        .build()
}

// ---------------------------------------------------------------------------
// Execution / quote lifecycles
// ---------------------------------------------------------------------------

pub fn execution_lifecycle() -> StateMachine<ExecutionState> {
    use ExecutionState::*;

    StateMachineBuilder::new("execution")
        .add_initial_state(New)
        .add_transition(New, Applied)
        .add_transition(New, Rejected)
        .add_terminal_state(Applied)
        .add_terminal_state(Rejected)
        .build()
}

pub fn quote_lifecycle() -> StateMachine<QuoteState> {
    use QuoteState::*;

    StateMachineBuilder::new("quote")
        .add_initial_state(New)
        .add_transition(New, Open)
        .add_transition(New, Canceled)
        .add_transition(Open, Canceled)
        .add_transition(Open, Expired)
        .add_terminal_state(Canceled)
        .add_terminal_state(Expired)
        .build()
}

// ---------------------------------------------------------------------------
// MachineSet
// ---------------------------------------------------------------------------

/// All machines a deployment needs, built once and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct MachineSet {
    pub variant: MachineVariant,
    pub order: StateMachine<OrderState>,
    pub cancel: StateMachine<CancelState>,
    pub execution: StateMachine<ExecutionState>,
    pub quote: StateMachine<QuoteState>,
}

impl MachineSet {
    pub fn new(variant: MachineVariant) -> Self {
        Self {
            variant,
            order: order_lifecycle(variant),
            cancel: cancel_intent(),
            execution: execution_lifecycle(),
            quote: quote_lifecycle(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_happy_path_validates() {
        use OrderState::*;
        let m = order_lifecycle(MachineVariant::Standard);
        let report = m.validate_sequence(New, &[Unack, Live, Filled, Closed]);
        assert!(report.is_valid(), "{:?}", report.message);
    }

    #[test]
    fn standard_requires_unack_before_live() {
        use OrderState::*;
        let m = order_lifecycle(MachineVariant::Standard);
        assert!(!m.is_valid_transition(New, Live));
        assert!(m.is_valid_transition(New, Unack));
    }

    #[test]
    fn simplified_skips_unack() {
        use OrderState::*;
        let m = order_lifecycle(MachineVariant::Simplified);
        assert!(m.is_valid_transition(New, Live));
        assert!(!m.is_valid_transition(New, Unack));
    }

    #[test]
    fn cancel_on_filled_is_invalid() {
        use OrderState::*;
        let m = order_lifecycle(MachineVariant::Standard);
        assert!(!m.is_valid_transition(Filled, Canceled));
    }

    #[test]
    fn no_edges_out_of_terminals() {
        use OrderState::*;
        let m = order_lifecycle(MachineVariant::Standard);
        for target in [New, Unack, Live, PartiallyFilled, Filled, Canceled] {
            assert!(!m.is_valid_transition(Closed, target));
            assert!(!m.is_valid_transition(Expired, target));
        }
    }

    #[test]
    fn repeated_partials_stay_partially_filled() {
        use OrderState::*;
        let m = order_lifecycle(MachineVariant::Standard);
        assert!(m.is_valid_transition(PartiallyFilled, PartiallyFilled));
    }

    #[test]
    fn entry_only_as_new() {
        use OrderState::*;
        let m = order_lifecycle(MachineVariant::Standard);
        assert!(m.is_valid_entry(None, New));
        assert!(!m.is_valid_entry(None, Live));
    }

    #[test]
    fn cancel_intent_round_trip() {
        use CancelState::*;
        let m = cancel_intent();
        assert!(m.is_valid_transition(None, PendingCancel));
        assert!(m.is_valid_transition(PendingCancel, None));
        assert!(!m.is_valid_transition(PendingCancel, PendingReplace));
    }

    #[test]
    fn variant_parse_round_trip() {
        assert_eq!(
            MachineVariant::parse("standard").unwrap(),
            MachineVariant::Standard
        );
        assert_eq!(
            MachineVariant::parse("simplified").unwrap(),
            MachineVariant::Simplified
        );
        assert!(MachineVariant::parse("other").is_err());
    }
}
