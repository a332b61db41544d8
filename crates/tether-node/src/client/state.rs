// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fmt;

use thiserror::Error;

/// Lifecycle of the gateway connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    /// `Connecting` or `Connected`.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error(_) => "error",
        }
    }

    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting | Connected, Error(_))
                | (Error(_), Connecting)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Error(reason) => write!(f, "error: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Holder of the single current state. Only [`StateMachine::transition`]
/// changes it.
#[derive(Debug, Default)]
pub struct StateMachine {
    current: ConnectionState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &ConnectionState {
        &self.current
    }

    /// Move to `next` if the edge is legal. Returns whether the value changed.
    pub fn transition(&mut self, next: ConnectionState) -> Result<bool, InvalidTransition> {
        if !self.current.can_transition_to(&next) {
            return Err(InvalidTransition {
                from: self.current.clone(),
                to: next,
            });
        }
        let changed = self.current != next;
        self.current = next;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    #[test]
    fn starts_disconnected() {
        assert_eq!(StateMachine::new().current(), &Disconnected);
    }

    #[test]
    fn happy_path_and_recovery() {
        let mut m = StateMachine::new();
        assert!(m.transition(Connecting).unwrap());
        assert!(m.transition(Connected).unwrap());
        assert!(m.transition(Error("lost".into())).unwrap());
        assert!(m.transition(Connecting).unwrap());
        assert!(m.transition(Disconnected).unwrap());
    }

    #[test]
    fn illegal_edges_are_rejected_and_state_kept() {
        let mut m = StateMachine::new();
        let err = m.transition(Connected).unwrap_err();
        assert_eq!(err.from, Disconnected);
        assert_eq!(m.current(), &Disconnected);

        assert!(m.transition(Error("x".into())).is_err());

        m.transition(Connecting).unwrap();
        m.transition(Error("refused".into())).unwrap();
        assert!(m.transition(Error("again".into())).is_err());
        assert!(m.transition(Connected).is_err());
    }

    #[test]
    fn disconnect_is_always_allowed() {
        for from in [Disconnected, Connecting, Connected, Error("e".into())] {
            assert!(from.can_transition_to(&Disconnected), "{from}");
        }
        let mut m = StateMachine::new();
        assert!(!m.transition(Disconnected).unwrap(), "no change");
    }
}
