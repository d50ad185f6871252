//! Real-time voice conversation client.
//!
//! One [`session::ConversationSession`] carries a live spoken conversation
//! between a caller and an automated agent over a single persistent
//! connection: microphone chunks go up as binary frames, transcript and
//! emotion updates come down as JSON text frames, and agent speech comes
//! down as binary frames for serialised playback.

pub mod audio;
pub mod config;
pub mod context;
pub mod conversation;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transport;
