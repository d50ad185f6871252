//! Streaming session: composes transport, codec, aggregator, capture and
//! playback into one [`ConversationSession`] per conversation.

pub mod event;
pub mod registry;
pub mod runner;

pub use event::{SessionError, SessionEvent};
pub use registry::SessionRegistry;
pub use runner::ConversationSession;
