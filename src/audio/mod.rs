//! Audio capture and chunking: microphone → mono PCM → timed Opus chunks.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → PcmFrame (mpsc) → downmix → resample
//!           → Chunker ──every chunk_interval──▶ AudioChunk ─▶ ChunkStream
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use voice_session::audio::{ChunkStream, CpalMicrophone};
//! use voice_session::config::AudioConfig;
//!
//! # async fn demo() {
//! let config = AudioConfig::default();
//! let mut chunks = ChunkStream::start(CpalMicrophone::from_config(&config), &config).unwrap();
//! let stop = chunks.stop_handle();
//!
//! while let Some(chunk) = chunks.next().await {
//!     println!("{} bytes", chunk.len());
//!     stop.stop(); // the next item is the terminal chunk
//! }
//! # }
//! ```

pub mod capture;
pub mod chunker;
pub mod resample;

pub use capture::{
    CaptureError, ChunkStream, CpalMicrophone, FrameSender, InputDevice, PcmFrame, StopHandle,
    StreamHandle,
};
pub use chunker::{encode_wav, opus_packets, AudioChunk, ChunkError, Chunker};
pub use resample::{downmix, resample, Resampler};
