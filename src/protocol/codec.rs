//! Frame classification and control message (de)serialisation.
//!
//! The frame kind is decided by the transport's own framing: a text frame is
//! always a control message, a binary frame is always raw audio. Payload
//! bytes are never inspected to tell the two apart.

use thiserror::Error;

use crate::audio::AudioChunk;
use crate::protocol::message::{ControlMessage, EmotionalState, Role};

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One discrete unit delivered over the persistent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 control message.
    Text(String),
    /// Raw audio payload, no envelope.
    Binary(Vec<u8>),
}

// ---------------------------------------------------------------------------
// ProtocolError
// ---------------------------------------------------------------------------

/// A text frame that could not be decoded. The frame is dropped; the
/// connection stays up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Not JSON, not an object, missing `type`, or a known `type` with
    /// missing/invalid fields.
    #[error("malformed control frame: {0}")]
    Malformed(String),

    /// Serialising an outbound control message failed.
    #[error("failed to encode control message: {0}")]
    Encode(String),
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// What an inbound frame means to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Transcription { role: Role, content: String },
    Emotion(EmotionalState),
    /// Synthesised agent speech.
    Audio(AudioChunk),
    /// Well-formed control message of a `type` this client does not handle.
    Ignored { kind: String },
}

/// Classify and decode one inbound frame.
///
/// ```
/// use voice_session::protocol::{decode, Frame, Inbound, Role};
///
/// let frame = Frame::Text(r#"{"type":"transcription","role":"agent","content":"Hello"}"#.into());
/// assert_eq!(
///     decode(frame).unwrap(),
///     Inbound::Transcription { role: Role::Agent, content: "Hello".into() }
/// );
/// ```
pub fn decode(frame: Frame) -> Result<Inbound, ProtocolError> {
    match frame {
        Frame::Binary(bytes) => Ok(Inbound::Audio(AudioChunk::from(bytes))),
        Frame::Text(text) => decode_control(&text),
    }
}

fn decode_control(text: &str) -> Result<Inbound, ProtocolError> {
    let message: ControlMessage =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    Ok(match message {
        ControlMessage::Transcription { role, content } => Inbound::Transcription { role, content },
        ControlMessage::Emotion { emotion } => Inbound::Emotion(emotion),
        ControlMessage::Unknown => Inbound::Ignored {
            kind: message_kind(text),
        },
    })
}

/// The `type` field of an already-validated control message.
fn message_kind(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
        .unwrap_or_default()
}

/// Outbound microphone audio travels as a bare binary frame.
pub fn encode_audio(chunk: AudioChunk) -> Frame {
    Frame::Binary(chunk.into_bytes())
}

/// Serialise a control message into a text frame.
pub fn encode_control(message: &ControlMessage) -> Result<Frame, ProtocolError> {
    serde_json::to_string(message)
        .map(Frame::Text)
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Frame {
        Frame::Text(s.to_string())
    }

    #[test]
    fn decodes_transcription() {
        let inbound =
            decode(text(r#"{"type":"transcription","role":"user","content":"I can pay 50"}"#))
                .unwrap();
        assert_eq!(
            inbound,
            Inbound::Transcription {
                role: Role::User,
                content: "I can pay 50".into()
            }
        );
    }

    #[test]
    fn decodes_emotion() {
        let inbound = decode(text(r#"{"type":"emotion","emotion":"defensive"}"#)).unwrap();
        assert_eq!(inbound, Inbound::Emotion(EmotionalState::Defensive));
    }

    #[test]
    fn unsupported_emotion_label_is_preserved() {
        let inbound = decode(text(r#"{"type":"emotion","emotion":"confused"}"#)).unwrap();
        assert_eq!(
            inbound,
            Inbound::Emotion(EmotionalState::Other("confused".into()))
        );
    }

    #[test]
    fn unknown_type_is_ignored_not_fatal() {
        let inbound = decode(text(r#"{"type":"heartbeat","seq":4}"#)).unwrap();
        assert_eq!(
            inbound,
            Inbound::Ignored {
                kind: "heartbeat".into()
            }
        );
    }

    #[test]
    fn non_json_is_protocol_error() {
        assert!(matches!(
            decode(text("{bad json")),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn missing_type_is_protocol_error() {
        assert!(decode(text(r#"{"role":"agent","content":"hi"}"#)).is_err());
    }

    #[test]
    fn non_object_is_protocol_error() {
        assert!(decode(text("42")).is_err());
        assert!(decode(text(r#"["transcription"]"#)).is_err());
    }

    #[test]
    fn known_type_with_missing_field_is_protocol_error() {
        assert!(decode(text(r#"{"type":"transcription","role":"agent"}"#)).is_err());
        assert!(decode(text(r#"{"type":"emotion"}"#)).is_err());
    }

    #[test]
    fn unknown_role_is_protocol_error() {
        assert!(decode(text(r#"{"type":"transcription","role":"narrator","content":"x"}"#))
            .is_err());
    }

    #[test]
    fn binary_frame_is_audio_regardless_of_content() {
        // Bytes that happen to be valid JSON are still audio.
        let bytes = br#"{"type":"emotion","emotion":"anxious"}"#.to_vec();
        let inbound = decode(Frame::Binary(bytes.clone())).unwrap();
        assert_eq!(inbound, Inbound::Audio(AudioChunk::from(bytes)));
    }

    #[test]
    fn outbound_audio_is_bare_binary() {
        let frame = encode_audio(AudioChunk::from(vec![1u8, 2, 3]));
        assert_eq!(frame, Frame::Binary(vec![1, 2, 3]));
    }

    #[test]
    fn encoded_control_decodes_to_same_meaning() {
        let frame = encode_control(&ControlMessage::Transcription {
            role: Role::Agent,
            content: "Hello".into(),
        })
        .unwrap();
        assert_eq!(
            decode(frame).unwrap(),
            Inbound::Transcription {
                role: Role::Agent,
                content: "Hello".into()
            }
        );
    }
}
