//! Session level connection states

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection state as reported to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Failed,
    Closed,
    Timeout,
}

impl ConnectionState {
    /// Failed, Closed and Timeout end a connection attempt
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Failed | ConnectionState::Closed | ConnectionState::Timeout
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Timeout => write!(f, "timeout"),
        }
    }
}

/// Which of a session's connections a state belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionKind {
    Normal,
    Presentation,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Normal => write!(f, "normal"),
            ConnectionKind::Presentation => write!(f, "presentation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallNetworkState {
    pub state: ConnectionState,
    pub kind: ConnectionKind,
}

impl CallNetworkState {
    pub fn new(state: ConnectionState, kind: ConnectionKind) -> Self {
        Self { state, kind }
    }
}

impl fmt::Display for CallNetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.state, self.kind)
    }
}
