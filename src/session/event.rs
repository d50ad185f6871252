//! Caller-facing error taxonomy and the session event stream.

use thiserror::Error;

use crate::conversation::TranscriptEntry;
use crate::playback::PlaybackError;
use crate::protocol::{EmotionalState, ProtocolError};
use crate::transport::{ConnectionState, TransportError};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Every failure a session can report.
///
/// Only [`Transport`](Self::Transport) changes session-wide state; the rest
/// are scoped to one frame, chunk or recording attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Recording could not start. The session itself is unaffected.
    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio was sent while the connection was not open. The chunk is
    /// dropped.
    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The outbound queue is full because the network is slower than
    /// capture. The chunk is dropped.
    #[error("outbound queue full, audio chunk dropped")]
    Congested,

    /// The conversation already has a live connection.
    #[error("conversation {0} already has an active session")]
    AlreadyActive(String),
}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// Published after the corresponding change is visible in the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionChanged(ConnectionState),
    TranscriptAppended(TranscriptEntry),
    EmotionChanged(EmotionalState),
    /// A non-fatal error, or the transport failure behind `Errored`.
    Error(SessionError),
}
