//! `ConversationLookup` trait and its HTTP implementation.
//!
//! The lookup is read-only and runs once when a client starts, before the
//! session opens. The session core never calls it.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ApiConfig;
use crate::protocol::EmotionalState;

// ---------------------------------------------------------------------------
// LookupError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LookupError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("conversation lookup timed out")]
    Timeout,

    #[error("conversation {0} not found")]
    NotFound(String),

    /// Any other non-success status.
    #[error("conversation service returned {0}")]
    Status(u16),

    #[error("failed to parse conversation: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for LookupError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LookupError::Timeout
        } else {
            LookupError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// ConversationSummary
// ---------------------------------------------------------------------------

/// What the conversation service knows about one conversation. Fields the
/// client does not use (e.g. the stored message list) are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub status: String,
    pub strategy: String,
    #[serde(default)]
    pub offered_amount: Option<f64>,
    #[serde(default)]
    pub accepted_amount: Option<f64>,
    #[serde(default)]
    pub negotiation_result: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub emotional_state_detected: Option<EmotionalState>,
}

// ---------------------------------------------------------------------------
// ConversationLookup trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ConversationLookup: Send + Sync {
    async fn fetch(&self, conversation_id: &str) -> Result<ConversationSummary, LookupError>;
}

// ---------------------------------------------------------------------------
// HttpConversationLookup
// ---------------------------------------------------------------------------

/// `GET {base_url}/conversations/{id}`.
pub struct HttpConversationLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConversationLookup {
    pub fn from_config(config: &ApiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn conversation_url(&self, conversation_id: &str) -> String {
        format!(
            "{}/conversations/{}",
            self.base_url,
            urlencoding::encode(conversation_id)
        )
    }
}

#[async_trait]
impl ConversationLookup for HttpConversationLookup {
    async fn fetch(&self, conversation_id: &str) -> Result<ConversationSummary, LookupError> {
        let response = self
            .client
            .get(self.conversation_url(conversation_id))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound(conversation_id.to_string()));
        }
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }

        response
            .json::<ConversationSummary>()
            .await
            .map_err(|e| LookupError::Parse(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let lookup = HttpConversationLookup::from_config(&ApiConfig {
            base_url: "http://api.local/api/v1/".into(),
            timeout_secs: 5,
        });
        assert_eq!(
            lookup.conversation_url("abc123"),
            "http://api.local/api/v1/conversations/abc123"
        );
    }

    #[test]
    fn url_escapes_reserved_characters_in_id() {
        let lookup = HttpConversationLookup::from_config(&ApiConfig {
            base_url: "http://api.local/api/v1".into(),
            timeout_secs: 5,
        });
        assert_eq!(
            lookup.conversation_url("a/b?c#d"),
            "http://api.local/api/v1/conversations/a%2Fb%3Fc%23d"
        );
    }

    #[test]
    fn parses_detail_response_and_ignores_extra_fields() {
        let body = r#"{
            "id": "abc123",
            "debtor_id": "d1",
            "status": "completed",
            "strategy": "empathetic",
            "emotional_state_detected": "anxious",
            "negotiation_result": "payment_plan",
            "offered_amount": 1200.0,
            "accepted_amount": 900,
            "duration_seconds": 184,
            "started_at": "2024-05-01T10:00:00",
            "ended_at": null,
            "messages": []
        }"#;
        let summary: ConversationSummary = serde_json::from_str(body).unwrap();
        assert_eq!(summary.status, "completed");
        assert_eq!(summary.accepted_amount, Some(900.0));
        assert_eq!(summary.duration_seconds, Some(184.0));
        assert_eq!(summary.emotional_state_detected, Some(EmotionalState::Anxious));
    }

    #[test]
    fn in_progress_conversation_has_no_outcome() {
        let body = r#"{"id":"x","status":"active","strategy":"firm",
                       "emotional_state_detected":null,"negotiation_result":null}"#;
        let summary: ConversationSummary = serde_json::from_str(body).unwrap();
        assert_eq!(summary.negotiation_result, None);
        assert_eq!(summary.offered_amount, None);
        assert_eq!(summary.emotional_state_detected, None);
    }

    #[tokio::test]
    async fn unreachable_service_is_a_request_error() {
        let lookup = HttpConversationLookup::from_config(&ApiConfig {
            base_url: "http://127.0.0.1:1".into(),
            timeout_secs: 2,
        });
        let err = lookup.fetch("abc123").await.unwrap_err();
        assert!(matches!(err, LookupError::Request(_) | LookupError::Timeout));
    }

    #[test]
    fn lookup_is_object_safe() {
        let lookup: Box<dyn ConversationLookup> =
            Box::new(HttpConversationLookup::from_config(&ApiConfig::default()));
        drop(lookup);
    }
}
