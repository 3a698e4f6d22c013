//! Generic lifecycle state machine.
//!
//! # Design
//!
//! A [`StateMachine<S>`] is an immutable declaration of allowed transitions
//! for a finite enum of lifecycle states, built once at startup via
//! [`StateMachineBuilder`] and shared read-only across workers. Validating a
//! transition is a pure adjacency-map lookup; nothing here mutates entity
//! state.
//!
//! Three policies are enforced regardless of configuration:
//!
//! 1. Transitions FROM a terminal state are always invalid.
//! 2. An unconfigured source state has an empty valid-target set; any
//!    transition from it fails.
//! 3. An absent current state (entity creation) is only valid when the
//!    target is a configured initial state.
//!
//! Illegal transitions signal via [`StateTransitionError`]; there is no
//! silent-mutation path.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

// ---------------------------------------------------------------------------
// StateTransitionError
// ---------------------------------------------------------------------------

/// Returned when a requested transition is not legal under the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransitionError<S> {
    /// The state the entity was in. `None` means "not yet created".
    pub from: Option<S>,
    /// The requested target state.
    pub to: S,
    /// Diagnostic reason (terminal source, unconfigured edge, ...).
    pub reason: String,
}

impl<S: Debug> std::fmt::Display for StateTransitionError<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.from {
            Some(from) => write!(
                f,
                "invalid transition {:?} -> {:?}: {}",
                from, self.to, self.reason
            ),
            None => write!(f, "invalid entry -> {:?}: {}", self.to, self.reason),
        }
    }
}

impl<S: Debug> std::error::Error for StateTransitionError<S> {}

// ---------------------------------------------------------------------------
// StateMachineBuilder
// ---------------------------------------------------------------------------

/// Builder for a [`StateMachine`]. Collect edges, initial and terminal
/// states, then [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct StateMachineBuilder<S> {
    name: String,
    transitions: HashMap<S, HashSet<S>>,
    initial_states: HashSet<S>,
    terminal_states: HashSet<S>,
}

impl<S: Copy + Eq + Hash + Debug> StateMachineBuilder<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transitions: HashMap::new(),
            initial_states: HashSet::new(),
            terminal_states: HashSet::new(),
        }
    }

    pub fn add_transition(mut self, from: S, to: S) -> Self {
        self.transitions.entry(from).or_default().insert(to);
        self
    }

    pub fn add_initial_state(mut self, state: S) -> Self {
        self.initial_states.insert(state);
        self
    }

    pub fn add_terminal_state(mut self, state: S) -> Self {
        self.terminal_states.insert(state);
        self
    }

    pub fn build(self) -> StateMachine<S> {
        StateMachine {
            name: self.name,
            transitions: self.transitions,
            initial_states: self.initial_states,
            terminal_states: self.terminal_states,
        }
    }
}

// ---------------------------------------------------------------------------
// StateMachine
// ---------------------------------------------------------------------------

/// Immutable transition table for the state enum `S`.
///
/// Cheap to share behind an `Arc`; all lookups are `O(1)` map/set probes.
#[derive(Debug, Clone)]
pub struct StateMachine<S> {
    name: String,
    transitions: HashMap<S, HashSet<S>>,
    initial_states: HashSet<S>,
    terminal_states: HashSet<S>,
}

impl<S: Copy + Eq + Hash + Debug> StateMachine<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initial_state(&self, state: S) -> bool {
        self.initial_states.contains(&state)
    }

    pub fn is_terminal_state(&self, state: S) -> bool {
        self.terminal_states.contains(&state)
    }

    /// Pure lookup: is `from -> to` a configured, legal edge?
    ///
    /// Terminal sources always answer `false`, even if an edge was
    /// (mis)configured out of them.
    pub fn is_valid_transition(&self, from: S, to: S) -> bool {
        if self.terminal_states.contains(&from) {
            return false;
        }
        self.transitions
            .get(&from)
            .map(|targets| targets.contains(&to))
            .unwrap_or(false)
    }

    /// Entry/creation check: an absent current state may only move into a
    /// configured initial state.
    pub fn is_valid_entry(&self, current: Option<S>, to: S) -> bool {
        match current {
            None => self.initial_states.contains(&to),
            Some(from) => self.is_valid_transition(from, to),
        }
    }

    /// Returns the target state on success, `None` on an illegal edge.
    pub fn transition(&self, from: S, to: S) -> Option<S> {
        self.is_valid_transition(from, to).then_some(to)
    }

    /// Fold a sequence of steps from `start`; short-circuits on the first
    /// invalid edge.
    pub fn transition_sequence(&self, start: S, steps: &[S]) -> Option<S> {
        steps
            .iter()
            .try_fold(start, |current, &next| self.transition(current, next))
    }

    /// Validate `from -> to`, producing a typed error with a diagnostic
    /// reason on failure.
    pub fn check(&self, from: Option<S>, to: S) -> Result<S, StateTransitionError<S>> {
        match from {
            None => {
                if self.initial_states.contains(&to) {
                    Ok(to)
                } else {
                    Err(StateTransitionError {
                        from: None,
                        to,
                        reason: format!("{to:?} is not an initial state of {}", self.name),
                    })
                }
            }
            Some(from) => {
                if self.terminal_states.contains(&from) {
                    return Err(StateTransitionError {
                        from: Some(from),
                        to,
                        reason: format!("{from:?} is terminal in {}", self.name),
                    });
                }
                if self.is_valid_transition(from, to) {
                    Ok(to)
                } else {
                    Err(StateTransitionError {
                        from: Some(from),
                        to,
                        reason: format!("edge not configured in {}", self.name),
                    })
                }
            }
        }
    }

    /// Walk the whole sequence and report the accumulated path, the failed
    /// edge (if any) and a diagnostic message. Unlike
    /// [`transition_sequence`](Self::transition_sequence) this never
    /// short-circuits the report: callers get the prefix that did validate.
    pub fn validate_sequence(&self, start: S, steps: &[S]) -> TransitionReport<S> {
        let mut path = vec![start];
        let mut current = start;

        for &next in steps {
            if self.is_valid_transition(current, next) {
                path.push(next);
                current = next;
            } else {
                return TransitionReport {
                    path,
                    failed_edge: Some((current, next)),
                    message: Some(format!(
                        "invalid transition {current:?} -> {next:?} in {}",
                        self.name
                    )),
                };
            }
        }

        TransitionReport {
            path,
            failed_edge: None,
            message: None,
        }
    }

    /// All configured targets reachable in one step from `from`. Terminal
    /// sources report an empty set.
    pub fn valid_targets(&self, from: S) -> Vec<S>
    where
        S: Ord,
    {
        if self.terminal_states.contains(&from) {
            return Vec::new();
        }
        let mut targets: Vec<S> = self
            .transitions
            .get(&from)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        targets.sort();
        targets
    }
}

// ---------------------------------------------------------------------------
// TransitionReport
// ---------------------------------------------------------------------------

/// Result of [`StateMachine::validate_sequence`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReport<S> {
    /// The states actually reached, starting with the start state.
    pub path: Vec<S>,
    /// The first edge that failed, if any.
    pub failed_edge: Option<(S, S)>,
    /// Diagnostic for the failed edge.
    pub message: Option<String>,
}

impl<S> TransitionReport<S> {
    pub fn is_valid(&self) -> bool {
        self.failed_edge.is_none()
    }

    /// Final state reached (the last element of the validated path).
    pub fn final_state(&self) -> Option<&S> {
        self.path.last()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    enum Phase {
        Draft,
        Active,
        Done,
        Dead,
    }

    fn machine() -> StateMachine<Phase> {
        StateMachineBuilder::new("phase")
            .add_initial_state(Phase::Draft)
            .add_transition(Phase::Draft, Phase::Active)
            .add_transition(Phase::Active, Phase::Done)
            .add_transition(Phase::Active, Phase::Dead)
            .add_terminal_state(Phase::Done)
            .add_terminal_state(Phase::Dead)
            .build()
    }

    #[test]
    fn configured_edge_is_valid() {
        let m = machine();
        assert!(m.is_valid_transition(Phase::Draft, Phase::Active));
        assert_eq!(m.transition(Phase::Draft, Phase::Active), Some(Phase::Active));
    }

    #[test]
    fn unconfigured_edge_is_invalid() {
        let m = machine();
        assert!(!m.is_valid_transition(Phase::Draft, Phase::Done));
        assert_eq!(m.transition(Phase::Draft, Phase::Done), None);
    }

    #[test]
    fn terminal_source_is_always_invalid() {
        // Deliberately misconfigure an edge out of a terminal state; the
        // terminal policy must still win.
        let m = StateMachineBuilder::new("bad")
            .add_initial_state(Phase::Draft)
            .add_transition(Phase::Done, Phase::Active)
            .add_terminal_state(Phase::Done)
            .build();
        assert!(!m.is_valid_transition(Phase::Done, Phase::Active));
        assert!(m.valid_targets(Phase::Done).is_empty());
    }

    #[test]
    fn unknown_source_has_empty_target_set() {
        let m = machine();
        assert!(!m.is_valid_transition(Phase::Done, Phase::Draft));
        assert!(m.valid_targets(Phase::Dead).is_empty());
    }

    #[test]
    fn entry_only_into_initial_state() {
        let m = machine();
        assert!(m.is_valid_entry(None, Phase::Draft));
        assert!(!m.is_valid_entry(None, Phase::Active));
        assert!(m.check(None, Phase::Draft).is_ok());
        let err = m.check(None, Phase::Active).unwrap_err();
        assert!(err.to_string().contains("not an initial state"));
    }

    #[test]
    fn sequence_folds_and_short_circuits() {
        let m = machine();
        assert_eq!(
            m.transition_sequence(Phase::Draft, &[Phase::Active, Phase::Done]),
            Some(Phase::Done)
        );
        assert_eq!(
            m.transition_sequence(Phase::Draft, &[Phase::Done, Phase::Active]),
            None
        );
    }

    #[test]
    fn validate_sequence_reports_prefix_and_failed_edge() {
        let m = machine();
        let report = m.validate_sequence(Phase::Draft, &[Phase::Active, Phase::Draft]);
        assert!(!report.is_valid());
        assert_eq!(report.path, vec![Phase::Draft, Phase::Active]);
        assert_eq!(report.failed_edge, Some((Phase::Active, Phase::Draft)));
        assert!(report.message.unwrap().contains("Active"));
    }

    #[test]
    fn validate_sequence_full_path_on_success() {
        let m = machine();
        let report = m.validate_sequence(Phase::Draft, &[Phase::Active, Phase::Done]);
        assert!(report.is_valid());
        assert_eq!(report.final_state(), Some(&Phase::Done));
        assert_eq!(report.path.len(), 3);
    }

    #[test]
    fn check_terminal_reports_reason() {
        let m = machine();
        let err = m.check(Some(Phase::Done), Phase::Active).unwrap_err();
        assert!(err.to_string().contains("terminal"));
    }
}
