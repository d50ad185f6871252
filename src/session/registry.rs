//! At most one live session per conversation id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::config::SessionConfig;
use crate::conversation::{with_state, ConversationState};
use crate::playback::OutputFactory;
use crate::transport::Connector;

use super::event::SessionError;
use super::runner::ConversationSession;

/// Tracks which conversation ids have a non-terminal session.
///
/// Holds only weak references: a dropped or closed session frees its id.
#[derive(Default)]
pub struct SessionRegistry {
    active: Mutex<HashMap<String, Weak<Mutex<ConversationState>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session unless `session_id` already has one that is
    /// connecting or open.
    pub fn open(
        &self,
        session_id: &str,
        config: &SessionConfig,
        connector: Arc<dyn Connector>,
        playback: Option<OutputFactory>,
    ) -> Result<ConversationSession, SessionError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.retain(|_, state| is_live(state));

        if active.contains_key(session_id) {
            log::warn!("session: {session_id} already active");
            return Err(SessionError::AlreadyActive(session_id.to_string()));
        }

        let session = ConversationSession::open(session_id, config, connector, playback);
        active.insert(
            session_id.to_string(),
            Arc::downgrade(session.shared_state()),
        );
        Ok(session)
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .is_some_and(is_live)
    }
}

fn is_live(state: &Weak<Mutex<ConversationState>>) -> bool {
    state
        .upgrade()
        .is_some_and(|state| !with_state(&state, |s| s.connection().is_terminal()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryConnector;

    fn hanging() -> Arc<dyn Connector> {
        Arc::new(MemoryConnector::hanging())
    }

    #[tokio::test]
    async fn second_live_session_is_rejected() {
        let registry = SessionRegistry::new();
        let config = SessionConfig::default();

        let _first = registry.open("abc123", &config, hanging(), None).unwrap();
        assert!(registry.is_active("abc123"));

        let second = registry.open("abc123", &config, hanging(), None);
        assert!(matches!(second, Err(SessionError::AlreadyActive(id)) if id == "abc123"));
    }

    #[tokio::test]
    async fn distinct_ids_are_independent() {
        let registry = SessionRegistry::new();
        let config = SessionConfig::default();
        let _a = registry.open("a", &config, hanging(), None).unwrap();
        let _b = registry.open("b", &config, hanging(), None).unwrap();
        assert!(registry.is_active("a") && registry.is_active("b"));
    }

    #[tokio::test]
    async fn closed_session_frees_its_id() {
        let registry = SessionRegistry::new();
        let config = SessionConfig::default();

        let mut first = registry.open("abc123", &config, hanging(), None).unwrap();
        first.disconnect().await;
        assert!(!registry.is_active("abc123"));

        let again = registry.open("abc123", &config, hanging(), None);
        assert!(again.is_ok());
    }
}
