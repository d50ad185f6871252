//! Conversation state aggregator.

pub mod state;

pub use state::{
    new_shared_conversation, transition, with_state, ConversationSnapshot, ConversationState,
    SharedConversation, TranscriptEntry, Transition, CONNECTED_NOTICE,
};
