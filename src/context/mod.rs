//! Conversation context from the surrounding application's API.

pub mod lookup;

pub use lookup::{ConversationLookup, ConversationSummary, HttpConversationLookup, LookupError};
