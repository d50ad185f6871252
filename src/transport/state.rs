//! Connection state machine.
//!
//! [`ConnectionState`] only ever changes through [`ConnectionState::next`];
//! nothing else in the crate assigns it directly.

use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Health of the single persistent connection behind a session.
///
/// ```text
/// Connecting ──Opened──▶ Open ──Closed──▶ Closed
///     │                   │
///     ├──Closed──▶ Closed  └──Failed──▶ Errored
///     └──Failed──▶ Errored
/// ```
///
/// `Closed` and `Errored` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Handshake in progress. Every session starts here.
    #[default]
    Connecting,
    /// Frames may be sent and are being received.
    Open,
    /// Closed by either peer.
    Closed,
    /// The handshake was rejected or the connection failed.
    Errored,
}

/// Transport-level signals that drive [`ConnectionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Closed,
    Failed,
}

impl ConnectionState {
    /// The state after `event`, or `None` if `event` is not a valid
    /// transition from `self`.
    ///
    /// ```
    /// use voice_session::transport::{ConnectionState, TransportEvent};
    ///
    /// let open = ConnectionState::Connecting.next(TransportEvent::Opened);
    /// assert_eq!(open, Some(ConnectionState::Open));
    /// assert_eq!(ConnectionState::Closed.next(TransportEvent::Closed), None);
    /// ```
    pub fn next(self, event: TransportEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        match (self, event) {
            (Connecting, TransportEvent::Opened) => Some(Open),
            (Connecting | Open, TransportEvent::Closed) => Some(Closed),
            (Connecting | Open, TransportEvent::Failed) => Some(Errored),
            _ => None,
        }
    }

    /// The only state in which frames may be sent.
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn happy_path() {
        let state = Connecting.next(TransportEvent::Opened).unwrap();
        assert_eq!(state, Open);
        assert_eq!(state.next(TransportEvent::Closed), Some(Closed));
    }

    #[test]
    fn failure_reachable_from_connecting_and_open() {
        assert_eq!(Connecting.next(TransportEvent::Failed), Some(Errored));
        assert_eq!(Open.next(TransportEvent::Failed), Some(Errored));
    }

    #[test]
    fn close_during_handshake() {
        assert_eq!(Connecting.next(TransportEvent::Closed), Some(Closed));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for state in [Closed, Errored] {
            assert!(state.is_terminal());
            for event in [
                TransportEvent::Opened,
                TransportEvent::Closed,
                TransportEvent::Failed,
            ] {
                assert_eq!(state.next(event), None, "{state} + {event:?}");
            }
        }
    }

    #[test]
    fn open_cannot_reopen() {
        assert_eq!(Open.next(TransportEvent::Opened), None);
    }

    #[test]
    fn only_open_is_open() {
        assert!(Open.is_open());
        assert!(!Connecting.is_open());
        assert!(!Closed.is_open());
        assert!(!Errored.is_open());
        assert_eq!(ConnectionState::default(), Connecting);
    }
}
