//! Dispatcher lifecycle state machine.
//!
//! BOOT → INIT → READY → RUNNING → FAULT / STOPPED
//!
//! A failed lifecycle hook moves INIT straight to FAULT; a deadline overrun
//! moves RUNNING to FAULT. FAULT is terminal until the process restarts,
//! matching a target where a missed deadline resets the board.

use crate::error::{SbError, SbResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Lifecycle states of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatcherState {
    /// Constructed, no hook has run.
    #[default]
    Boot,
    /// Lifecycle hooks are running.
    Init,
    /// Hooks succeeded, no tier has fired yet.
    Ready,
    /// Tiers are being dispatched.
    Running,
    /// Bring-up failure or missed deadline.
    Fault,
    /// Stopped on request; outputs driven safe.
    Stopped,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "BOOT"),
            Self::Init => write!(f, "INIT"),
            Self::Ready => write!(f, "READY"),
            Self::Running => write!(f, "RUNNING"),
            Self::Fault => write!(f, "FAULT"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl DispatcherState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: DispatcherState) -> bool {
        use DispatcherState::{Boot, Fault, Init, Ready, Running, Stopped};

        matches!(
            (self, target),
            (Boot, Init)
                | (Init, Ready)
                | (Ready, Running)
                | (Init | Ready | Running, Fault)
                | (Ready | Running, Stopped)
        )
    }

    /// True once no further dispatching can happen.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fault | Self::Stopped)
    }
}

/// State holder with transition bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: DispatcherState,
    previous: Option<DispatcherState>,
}

impl StateMachine {
    /// Create a state machine in BOOT.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> DispatcherState {
        self.current
    }

    /// State before the last transition.
    #[must_use]
    pub fn previous_state(&self) -> Option<DispatcherState> {
        self.previous
    }

    /// Attempt a transition.
    ///
    /// # Errors
    ///
    /// Returns [`SbError::InvalidStateTransition`] if the edge is not allowed.
    pub fn transition(&mut self, target: DispatcherState) -> SbResult<()> {
        if !self.current.can_transition_to(target) {
            return Err(SbError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }
        debug!(from = %self.current, to = %target, "State transition");
        self.previous = Some(self.current);
        self.current = target;
        Ok(())
    }

    /// Move to FAULT if allowed from here; a no-op from BOOT or a terminal state.
    pub fn enter_fault(&mut self) {
        if self.current.can_transition_to(DispatcherState::Fault) {
            self.previous = Some(self.current);
            self.current = DispatcherState::Fault;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.state(), DispatcherState::Boot);

        sm.transition(DispatcherState::Init).unwrap();
        sm.transition(DispatcherState::Ready).unwrap();
        sm.transition(DispatcherState::Running).unwrap();
        assert_eq!(sm.state(), DispatcherState::Running);
        assert_eq!(sm.previous_state(), Some(DispatcherState::Ready));
    }

    #[test]
    fn test_cannot_skip_init() {
        let mut sm = StateMachine::new();
        let err = sm.transition(DispatcherState::Running).unwrap_err();
        assert_eq!(
            err,
            SbError::InvalidStateTransition {
                from: "BOOT".into(),
                to: "RUNNING".into()
            }
        );
        assert_eq!(sm.state(), DispatcherState::Boot);
    }

    #[test]
    fn test_fault_is_terminal() {
        let mut sm = StateMachine::new();
        sm.transition(DispatcherState::Init).unwrap();
        sm.enter_fault();
        assert_eq!(sm.state(), DispatcherState::Fault);
        assert!(sm.state().is_terminal());

        assert!(sm.transition(DispatcherState::Running).is_err());
        assert!(sm.transition(DispatcherState::Init).is_err());
    }

    #[test]
    fn test_enter_fault_from_boot_is_noop() {
        let mut sm = StateMachine::new();
        sm.enter_fault();
        assert_eq!(sm.state(), DispatcherState::Boot);
    }

    #[test]
    fn test_stop_from_running() {
        let mut sm = StateMachine::new();
        sm.transition(DispatcherState::Init).unwrap();
        sm.transition(DispatcherState::Ready).unwrap();
        sm.transition(DispatcherState::Running).unwrap();
        sm.transition(DispatcherState::Stopped).unwrap();
        assert!(sm.state().is_terminal());
    }
}
