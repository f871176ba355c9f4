//! Connection state and fault types shared by the sensor bridge and the
//! device link.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an external connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Staying in the same state is always allowed (a no-op).
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Degraded)
                | (Connected, Disconnected)
                | (Degraded, Connecting)
                | (Degraded, Disconnected)
        )
    }

    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// Fault categories recovered locally by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Monitoring source not running or not found
    SourceUnavailable,
    /// Helper process exited or the shared region vanished
    SourceCrashed,
    /// Source reported a startup error (e.g. missing privileges)
    SourceStartupFailed,
    /// No successful poll within the staleness window
    SensorStale,
    DeviceNotFound,
    DeviceWriteFailed,
    DeviceDisconnected,
}

/// A fault occurrence with its message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Immutable view of a connection's state, published by its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub since: DateTime<Utc>,
    /// Connection attempts since the last successful connect
    pub attempts: u32,
    pub last_fault: Option<Fault>,
    /// Extra detail for the user, e.g. the helper's search paths
    pub diagnostic: Option<String>,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            since: Utc::now(),
            attempts: 0,
            last_fault: None,
            diagnostic: None,
        }
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_allowed_transitions() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Connecting));
        assert!(Connected.can_transition_to(Connected));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Connecting.can_transition_to(Degraded));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Degraded));
        assert!(!Degraded.can_transition_to(Connected));
    }
}
