//! Conversation state aggregator and shared session state.
//!
//! [`ConversationState`] is the single source of truth for what the caller
//! sees: the transcript, the current emotional state and the connection
//! health. Every mutation goes through one of its `apply_*` methods, and all
//! of them run under the [`SharedConversation`] lock, so an observer taking
//! a [`snapshot`](ConversationState::snapshot) never sees half an update.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::{EmotionalState, Role};
use crate::transport::{ConnectionState, TransportEvent};

/// Content of the system entry appended when the connection opens.
pub const CONNECTED_NOTICE: &str = "Connected";

// ---------------------------------------------------------------------------
// TranscriptEntry
// ---------------------------------------------------------------------------

/// One transcript line. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    /// When this client received the line, not when it was spoken.
    pub received_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ConversationState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConversationState {
    session_id: String,
    connection: ConnectionState,
    transcript: Vec<TranscriptEntry>,
    emotion: EmotionalState,
}

/// A consistent copy of [`ConversationState`] at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSnapshot {
    pub session_id: String,
    pub connection: ConnectionState,
    pub transcript: Vec<TranscriptEntry>,
    pub emotion: EmotionalState,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            connection: ConnectionState::Connecting,
            transcript: Vec::new(),
            emotion: EmotionalState::Unknown,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn emotion(&self) -> &EmotionalState {
        &self.emotion
    }

    /// Append a line stamped with the current time and return it.
    pub fn apply_transcription(&mut self, role: Role, content: impl Into<String>) -> &TranscriptEntry {
        self.transcript.push(TranscriptEntry {
            role,
            content: content.into(),
            received_at: Utc::now(),
        });
        &self.transcript[self.transcript.len() - 1]
    }

    /// Replace the emotional state. Unrecognised labels are kept verbatim.
    pub fn apply_emotion(&mut self, emotion: EmotionalState) {
        self.emotion = emotion;
    }

    /// Overwrite the connection state. Only the transport's transitions
    /// call this, via [`transition`].
    pub(crate) fn apply_connection_state(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    /// Drive the connection state machine by one event.
    ///
    /// Returns `None` and changes nothing if the event is not valid in the
    /// current state. Opening appends exactly one system entry.
    pub fn apply_transport_event(&mut self, event: TransportEvent) -> Option<Transition> {
        let next = self.connection.next(event)?;
        self.apply_connection_state(next);
        let notice = (next == ConnectionState::Open)
            .then(|| self.apply_transcription(Role::System, CONNECTED_NOTICE).clone());
        Some(Transition {
            state: next,
            notice,
        })
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            session_id: self.session_id.clone(),
            connection: self.connection,
            transcript: self.transcript.clone(),
            emotion: self.emotion.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// SharedConversation
// ---------------------------------------------------------------------------

/// Thread-safe handle shared by the receive loop, the uplink and observers.
pub type SharedConversation = Arc<Mutex<ConversationState>>;

pub fn new_shared_conversation(session_id: impl Into<String>) -> SharedConversation {
    Arc::new(Mutex::new(ConversationState::new(session_id)))
}

/// Run `f` under the lock. A poisoned lock is recovered: every `apply_*`
/// leaves the state consistent even if a caller panicked afterwards.
pub fn with_state<R>(shared: &SharedConversation, f: impl FnOnce(&mut ConversationState) -> R) -> R {
    let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

/// What a successful [`transition`] changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: ConnectionState,
    /// The system entry appended on `Connecting → Open`.
    pub notice: Option<TranscriptEntry>,
}

/// [`ConversationState::apply_transport_event`] under the lock.
pub fn transition(shared: &SharedConversation, event: TransportEvent) -> Option<Transition> {
    with_state(shared, |state| state.apply_transport_event(event))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
