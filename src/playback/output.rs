//! Audio output backends for agent speech.

use std::io::Cursor;

use rodio::{OutputStream, OutputStreamHandle, Sink};
use thiserror::Error;

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// A unit that could not be played. Never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// No output device, or the device refused a new sink.
    #[error("audio output unavailable: {0}")]
    Device(String),

    /// The payload is not a format the decoder understands.
    #[error("could not decode audio unit: {0}")]
    Decode(String),

    /// The playback worker could not be started.
    #[error("playback worker failed: {0}")]
    Worker(String),

    /// The queue already holds its configured number of waiting units; the
    /// new unit was dropped.
    #[error("playback queue full ({0} units waiting), unit dropped")]
    Overflow(usize),

    /// The queue has been shut down.
    #[error("playback queue closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// AudioOutput
// ---------------------------------------------------------------------------

/// Plays complete, independently decodable audio units.
///
/// Implementations live on the playback thread and need not be `Send`.
pub trait AudioOutput {
    /// Play `unit` to completion; return only once it has finished or
    /// failed.
    fn play(&mut self, unit: &[u8]) -> Result<(), PlaybackError>;
}

/// Builds the output on the playback thread. Called again for the next unit
/// if a previous attempt failed.
pub type OutputFactory = Box<dyn Fn() -> Result<Box<dyn AudioOutput>, PlaybackError> + Send>;

// ---------------------------------------------------------------------------
// RodioOutput
// ---------------------------------------------------------------------------

/// Default output device via `rodio`. Accepts WAV, MP3, FLAC and Vorbis.
pub struct RodioOutput {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    volume: f32,
}

impl RodioOutput {
    pub fn open(volume: f32) -> Result<Self, PlaybackError> {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| PlaybackError::Device(e.to_string()))?;
        log::info!("playback: output stream ready");
        Ok(Self {
            _stream: stream,
            handle,
            volume,
        })
    }

    /// An [`OutputFactory`] opening the default device at `volume`.
    pub fn factory(volume: f32) -> OutputFactory {
        Box::new(move || Ok(Box::new(RodioOutput::open(volume)?) as Box<dyn AudioOutput>))
    }
}

impl AudioOutput for RodioOutput {
    fn play(&mut self, unit: &[u8]) -> Result<(), PlaybackError> {
        let source = rodio::Decoder::new(Cursor::new(unit.to_vec()))
            .map_err(|e| PlaybackError::Decode(e.to_string()))?;
        // One sink per unit: decoded buffers are freed when it drops.
        let sink = Sink::try_new(&self.handle).map_err(|e| PlaybackError::Device(e.to_string()))?;
        sink.set_volume(self.volume);
        sink.append(source);
        sink.sleep_until_end();
        Ok(())
    }
}
