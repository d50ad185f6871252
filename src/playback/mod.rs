//! Playback sink for synthesised agent speech.
//!
//! ```text
//! binary frame ─▶ PlaybackQueue::enqueue ─▶ audio-playback thread ─▶ AudioOutput::play (one at a time)
//! ```

pub mod output;
pub mod queue;

pub use output::{AudioOutput, OutputFactory, PlaybackError, RodioOutput};
pub use queue::{PlaybackEvent, PlaybackQueue};
