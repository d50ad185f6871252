//! Control message schema carried in text frames.
//!
//! ```text
//! { "type": "transcription", "role": "agent"|"user"|"system", "content": "…" }
//! { "type": "emotion", "emotion": "defensive" }
//! ```
//!
//! Any other `type` decodes to [`ControlMessage::Unknown`] so newer servers
//! can add message kinds without breaking older clients.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    User,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::User => "user",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EmotionalState
// ---------------------------------------------------------------------------

/// The counterpart's current emotional state as classified by the server.
///
/// Labels outside the known set are kept verbatim in [`EmotionalState::Other`]
/// so nothing the server sent is lost; only their [`presentation`] falls back
/// to the `unknown` styling.
///
/// [`presentation`]: EmotionalState::presentation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EmotionalState {
    Cooperative,
    Defensive,
    Aggressive,
    Evasive,
    Anxious,
    /// Not classified yet.
    #[default]
    Unknown,
    /// A label this client does not recognise.
    Other(String),
}

/// How an emotional state is shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presentation {
    /// Indicator colour name.
    pub color: &'static str,
    /// One-line guidance for the operator.
    pub description: &'static str,
}

const UNKNOWN_PRESENTATION: Presentation = Presentation {
    color: "gray",
    description: "Analyzing emotional state...",
};

impl EmotionalState {
    /// Parse a wire label. Never fails.
    ///
    /// ```
    /// use voice_session::protocol::EmotionalState;
    ///
    /// assert_eq!(EmotionalState::from_label("defensive"), EmotionalState::Defensive);
    /// assert_eq!(
    ///     EmotionalState::from_label("hopeful"),
    ///     EmotionalState::Other("hopeful".into())
    /// );
    /// ```
    pub fn from_label(label: &str) -> Self {
        match label {
            "cooperative" => Self::Cooperative,
            "defensive" => Self::Defensive,
            "aggressive" => Self::Aggressive,
            "evasive" => Self::Evasive,
            "anxious" => Self::Anxious,
            "unknown" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }

    /// The label exactly as it travels on the wire.
    pub fn label(&self) -> &str {
        match self {
            Self::Cooperative => "cooperative",
            Self::Defensive => "defensive",
            Self::Aggressive => "aggressive",
            Self::Evasive => "evasive",
            Self::Anxious => "anxious",
            Self::Unknown => "unknown",
            Self::Other(label) => label,
        }
    }

    /// `false` for [`EmotionalState::Other`].
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    pub fn presentation(&self) -> Presentation {
        match self {
            Self::Cooperative => Presentation {
                color: "green",
                description: "The person is receptive and willing to discuss options.",
            },
            Self::Defensive => Presentation {
                color: "yellow",
                description: "The person is guarded and skeptical. Build trust gradually.",
            },
            Self::Aggressive => Presentation {
                color: "red",
                description: "The person is hostile. Stay calm and professional.",
            },
            Self::Evasive => Presentation {
                color: "orange",
                description: "The person avoids engagement. Be patient and informative.",
            },
            Self::Anxious => Presentation {
                color: "purple",
                description: "The person is stressed. Prioritize reassurance.",
            },
            Self::Unknown | Self::Other(_) => UNKNOWN_PRESENTATION,
        }
    }
}

impl From<String> for EmotionalState {
    fn from(label: String) -> Self {
        match Self::from_label(&label) {
            Self::Other(_) => Self::Other(label),
            known => known,
        }
    }
}

impl From<EmotionalState> for String {
    fn from(state: EmotionalState) -> Self {
        match state {
            EmotionalState::Other(label) => label,
            known => known.label().to_string(),
        }
    }
}

impl fmt::Display for EmotionalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// ControlMessage
// ---------------------------------------------------------------------------

/// A structured message carried in a text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// One transcript line.
    Transcription { role: Role, content: String },
    /// Replaces the current emotional state.
    Emotion { emotion: EmotionalState },
    /// Any `type` this client does not know.
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_labels_round_trip_through_strings() {
        for label in [
            "cooperative",
            "defensive",
            "aggressive",
            "evasive",
            "anxious",
            "unknown",
        ] {
            let state = EmotionalState::from(label.to_string());
            assert!(state.is_recognized(), "{label} should be recognised");
            assert_eq!(String::from(state), label);
        }
    }

    #[test]
    fn unrecognised_label_is_kept_verbatim() {
        let state = EmotionalState::from("Frustrated ".to_string());
        assert_eq!(state, EmotionalState::Other("Frustrated ".into()));
        assert_eq!(state.label(), "Frustrated ");
        assert!(!state.is_recognized());
    }

    #[test]
    fn unrecognised_label_uses_unknown_presentation() {
        let other = EmotionalState::Other("hopeful".into());
        assert_eq!(other.presentation(), EmotionalState::Unknown.presentation());
        assert_eq!(other.presentation().color, "gray");
    }

    #[test]
    fn each_known_state_has_distinct_colour() {
        let colours: Vec<_> = [
            EmotionalState::Cooperative,
            EmotionalState::Defensive,
            EmotionalState::Aggressive,
            EmotionalState::Evasive,
            EmotionalState::Anxious,
            EmotionalState::Unknown,
        ]
        .iter()
        .map(|s| s.presentation().color)
        .collect();

        let mut deduped = colours.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), colours.len());
    }

    #[test]
    fn default_state_is_unknown() {
        assert_eq!(EmotionalState::default(), EmotionalState::Unknown);
    }

    #[test]
    fn role_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Agent).unwrap(), "\"agent\"");
        assert_eq!(Role::System.to_string(), "system");
    }

    #[test]
    fn emotion_message_serialises_with_type_tag() {
        let msg = ControlMessage::Emotion {
            emotion: EmotionalState::Anxious,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "emotion");
        assert_eq!(json["emotion"], "anxious");
    }
}
