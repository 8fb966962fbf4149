//! Session State Machine
//!
//! Tracks the lifecycle of one device session, validates transitions and
//! counts failed reconnect attempts against a fixed budget.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Initial state, not connected
    Disconnected,
    /// Acquiring a device and initialising capabilities
    Connecting,
    /// Connected and every capability initialised
    Connected,
    /// Re-establishing GATT on a previously acquired device
    Reconnecting,
    /// Closing the session on request
    Disconnecting,
}

impl SessionState {
    /// Check if state is the connected state
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if state is a transitional state
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting | Self::Disconnecting)
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: SessionState,
    /// New state
    pub to: SessionState,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Reason for transition
    pub reason: Option<String>,
}

/// Rejected state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid session transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// State at the time
    pub from: SessionState,
    /// Requested state
    pub to: SessionState,
}

/// Reconnect budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Retries allowed after the first failed attempt
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl ReconnectPolicy {
    /// Check if another attempt follows `failed` consecutive failures
    pub fn should_retry(&self, failed: u32) -> bool {
        failed <= self.max_attempts
    }
}

/// Session state machine
#[derive(Debug)]
pub struct SessionStateMachine {
    /// Current state
    state: SessionState,
    /// State history
    history: Vec<StateTransition>,
    /// Maximum history size
    max_history: usize,
    /// Reconnect budget
    policy: ReconnectPolicy,
    /// Consecutive failed reconnect attempts
    reconnect_attempts: u32,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    /// Create a new state machine
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            history: Vec::new(),
            max_history: 100,
            policy: ReconnectPolicy::default(),
            reconnect_attempts: 0,
        }
    }

    /// Create with a custom reconnect policy
    pub fn with_policy(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            ..Self::new()
        }
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get consecutive failed reconnect attempts
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Get state history
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Check if a transition would be accepted
    pub fn can_transition(&self, new_state: SessionState) -> bool {
        use SessionState::*;

        match (self.state, new_state) {
            (Disconnected, Connecting | Reconnecting) => true,
            (Connecting, Connected | Disconnected) => true,
            // Link lost without a disconnect notification
            (Connected, Disconnecting | Disconnected | Reconnecting) => true,
            (Reconnecting, Connected | Disconnected) => true,
            (Disconnecting, Disconnected) => true,
            (a, b) => a == b,
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: SessionState, reason: Option<&str>) -> Result<(), InvalidTransition> {
        if !self.can_transition(new_state) {
            return Err(InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        self.history.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Local::now(),
            reason: reason.map(String::from),
        });
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        tracing::debug!(from = ?self.state, to = ?new_state, reason, "session transition");
        self.state = new_state;

        if new_state == SessionState::Connected {
            self.reconnect_attempts = 0;
        }

        Ok(())
    }

    /// Count a failed reconnect attempt. Returns true if another attempt is allowed.
    pub fn record_failed_attempt(&mut self) -> bool {
        self.reconnect_attempts += 1;
        self.policy.should_retry(self.reconnect_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_transitions() {
        let mut sm = SessionStateMachine::new();

        assert_eq!(sm.state(), SessionState::Disconnected);

        sm.transition(SessionState::Connecting, Some("connect")).unwrap();
        assert!(sm.state().is_transitional());

        sm.transition(SessionState::Connected, Some("ready")).unwrap();
        assert!(sm.state().is_connected());

        sm.transition(SessionState::Disconnecting, None).unwrap();
        sm.transition(SessionState::Disconnected, None).unwrap();
        assert_eq!(sm.history().len(), 4);
        assert_eq!(sm.history()[1].reason.as_deref(), Some("ready"));
    }

    #[test]
    fn test_invalid_transition() {
        let mut sm = SessionStateMachine::new();

        // Can't go directly from Disconnected to Connected
        assert_eq!(
            sm.transition(SessionState::Connected, None),
            Err(InvalidTransition {
                from: SessionState::Disconnected,
                to: SessionState::Connected,
            })
        );
        assert!(sm.transition(SessionState::Disconnecting, None).is_err());
        assert_eq!(sm.state(), SessionState::Disconnected);
        assert!(sm.history().is_empty());
    }

    #[test]
    fn test_reconnect_counting() {
        let mut sm = SessionStateMachine::with_policy(ReconnectPolicy { max_attempts: 2 });

        sm.transition(SessionState::Reconnecting, None).unwrap();
        assert!(sm.record_failed_attempt());
        assert!(sm.record_failed_attempt());
        assert!(!sm.record_failed_attempt());
        assert_eq!(sm.reconnect_attempts(), 3);

        sm.transition(SessionState::Connected, None).unwrap();
        assert_eq!(sm.reconnect_attempts(), 0);
    }

    #[test]
    fn test_policy() {
        let policy = ReconnectPolicy::default();

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }
}
