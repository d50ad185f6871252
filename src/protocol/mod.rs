//! Protocol codec for the shared streaming channel.
//!
//! ```text
//! inbound  text frame   ──▶ ControlMessage ──▶ Inbound::{Transcription, Emotion, Ignored}
//! inbound  binary frame ──────────────────────▶ Inbound::Audio
//! outbound AudioChunk   ──────────────────────▶ binary frame
//! ```

pub mod codec;
pub mod message;

pub use codec::{decode, encode_audio, encode_control, Frame, Inbound, ProtocolError};
pub use message::{ControlMessage, EmotionalState, Presentation, Role};
