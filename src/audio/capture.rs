//! Microphone capture via `cpal`, chunked on a fixed wall-clock cadence.
//!
//! [`ChunkStream::start`] opens an [`InputDevice`] on a dedicated
//! `audio-capture` thread and returns a lazy stream of [`AudioChunk`]s.
//!
//! ```text
//! cpal callback ──PcmFrame──▶ audio-capture thread ──every interval──▶ AudioChunk
//!                               (Chunker)            ──on stop──────────▶ terminal AudioChunk, then end
//! ```
//!
//! The device guard lives and dies on the capture thread (`cpal::Stream` is
//! not `Send` on every platform). It is dropped on every exit path, stop,
//! early drop of the stream, or the callback side hanging up, and always
//! before the terminal chunk is emitted. A consumer that has seen the end of
//! the stream therefore knows the device is released.

use std::pin::Pin;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc as async_mpsc;

use crate::audio::chunker::{AudioChunk, ChunkError, Chunker};
use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// PcmFrame
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the device callback.
///
/// Samples are interleaved `f32` in the range `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    pub samples: Vec<f32>,
    /// Native sample rate of this buffer in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
}

enum CaptureInput {
    Frame(PcmFrame),
    Stop,
}

/// Hands device buffers to the capture thread. Cheap to clone; safe to move
/// into a realtime callback.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<CaptureInput>,
}

impl FrameSender {
    /// Queue one buffer. Silently dropped once the recording has ended.
    pub fn send(&self, frame: PcmFrame) {
        let _ = self.tx.send(CaptureInput::Frame(frame));
    }
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring the input device.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device {0:?} not found")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported input sample format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("capture thread failed: {0}")]
    Thread(String),

    /// The configured chunk format cannot be produced, e.g. Opus at a rate
    /// it does not support. Reported before the device is touched.
    #[error("cannot encode chunks: {0}")]
    Encoder(#[from] ChunkError),
}

// ---------------------------------------------------------------------------
// InputDevice
// ---------------------------------------------------------------------------

/// Something that can be opened to deliver [`PcmFrame`]s.
///
/// `open` runs on the capture thread; the returned guard keeps the device
/// streaming and is dropped on that same thread to release it.
pub trait InputDevice: Send + 'static {
    type Guard;

    fn open(&self, frames: FrameSender) -> Result<Self::Guard, CaptureError>;
}

/// RAII guard that keeps the cpal stream alive.
pub struct StreamHandle {
    _stream: cpal::Stream,
}

/// The system microphone, opened through the default cpal host.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    device_name: Option<String>,
    echo_cancellation: bool,
    noise_suppression: bool,
}

impl CpalMicrophone {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            device_name: config.input_device.clone(),
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
        }
    }

    fn find_device(&self, host: &cpal::Host) -> Result<cpal::Device, CaptureError> {
        match &self.device_name {
            None => host.default_input_device().ok_or(CaptureError::NoDevice),
            Some(name) => host
                .input_devices()?
                .find(|d| d.name().is_ok_and(|n| &n == name))
                .ok_or_else(|| CaptureError::DeviceNotFound(name.clone())),
        }
    }
}

impl InputDevice for CpalMicrophone {
    type Guard = StreamHandle;

    fn open(&self, frames: FrameSender) -> Result<StreamHandle, CaptureError> {
        let host = cpal::default_host();
        let device = self.find_device(&host)?;
        let supported = device.default_input_config()?;

        // cpal has no portable switch for these; the OS input chain applies
        // them when it is configured to.
        if self.echo_cancellation || self.noise_suppression {
            log::debug!(
                "capture: echo cancellation={} noise suppression={} requested from platform",
                self.echo_cancellation,
                self.noise_suppression
            );
        }

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let stream = match format {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, frames, sample_rate, channels)?
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, frames, sample_rate, channels)?
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &config, frames, sample_rate, channels)?
            }
            other => return Err(CaptureError::UnsupportedFormat(format!("{other:?}"))),
        };

        stream.play()?;
        log::info!(
            "capture: input stream started ({sample_rate} Hz, {channels} ch, {format:?})"
        );
        Ok(StreamHandle { _stream: stream })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frames: FrameSender,
    sample_rate: u32,
    channels: u16,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            frames.send(PcmFrame {
                samples: data.iter().map(|&s| f32::from_sample(s)).collect(),
                sample_rate,
                channels,
            });
        },
        |err: cpal::StreamError| {
            log::error!("capture: cpal stream error: {err}");
        },
        None,
    )?;
    Ok(stream)
}

// ---------------------------------------------------------------------------
// ChunkStream
// ---------------------------------------------------------------------------

/// Stops a recording from anywhere; clones share the same recording.
#[derive(Clone)]
pub struct StopHandle {
    tx: mpsc::Sender<CaptureInput>,
}

impl StopHandle {
    /// Ask the capture thread to flush, release the device and end the
    /// stream. Idempotent.
    pub fn stop(&self) {
        let _ = self.tx.send(CaptureInput::Stop);
    }
}

/// One recording span: a lazy, non-restartable sequence of chunks.
///
/// Yields a chunk every interval while samples arrive, then exactly one
/// terminal chunk after [`stop`](Self::stop), then `None` forever.
pub struct ChunkStream {
    chunks: async_mpsc::UnboundedReceiver<AudioChunk>,
    stop: StopHandle,
}

impl ChunkStream {
    /// Open `device` and begin chunking at `config.chunk_interval()`.
    ///
    /// Blocks until the device has either started or failed; call from
    /// `spawn_blocking` inside async code.
    pub fn start<D: InputDevice>(device: D, config: &AudioConfig) -> Result<Self, CaptureError> {
        let (input_tx, input_rx) = mpsc::channel::<CaptureInput>();
        let (chunk_tx, chunk_rx) = async_mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), CaptureError>>(1);

        let frames = FrameSender {
            tx: input_tx.clone(),
        };
        let chunker = Chunker::new(config.sample_rate, config.encoding)?;
        let interval = config.chunk_interval().max(Duration::from_millis(1));

        std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let guard = match device.open(frames) {
                    Ok(guard) => guard,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_capture(guard, input_rx, chunk_tx, chunker, interval);
            })
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                chunks: chunk_rx,
                stop: StopHandle { tx: input_tx },
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::Thread(
                "capture thread exited during startup".into(),
            )),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Next chunk, or `None` once the terminal chunk has been taken.
    pub async fn next_chunk(&mut self) -> Option<AudioChunk> {
        self.chunks.recv().await
    }
}

impl Stream for ChunkStream {
    type Item = AudioChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<AudioChunk>> {
        self.chunks.poll_recv(cx)
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Capture-thread body. Owns `guard` until the span ends.
fn run_capture<G>(
    guard: G,
    input: mpsc::Receiver<CaptureInput>,
    out: async_mpsc::UnboundedSender<AudioChunk>,
    mut chunker: Chunker,
    interval: Duration,
) {
    let mut deadline = Instant::now() + interval;

    loop {
        let wait = deadline.saturating_duration_since(Instant::now());
        match input.recv_timeout(wait) {
            Ok(CaptureInput::Frame(frame)) => chunker.push(&frame),
            Ok(CaptureInput::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        if now >= deadline {
            match chunker.flush() {
                Ok(Some(chunk)) => {
                    let _ = out.send(chunk);
                }
                Ok(None) => {}
                Err(e) => log::error!("capture: failed to encode chunk: {e}"),
            }
            deadline += interval;
            if deadline <= now {
                // fell behind; resume the cadence from now rather than burst
                deadline = now + interval;
            }
        }
    }

    drop(guard);

    // Buffers the callback queued before the device stopped still belong to
    // this span.
    for pending in input.try_iter() {
        if let CaptureInput::Frame(frame) = pending {
            chunker.push(&frame);
        }
    }

    match chunker.finish() {
        Ok(terminal) => {
            let _ = out.send(terminal);
        }
        Err(e) => log::error!("capture: failed to encode terminal chunk: {e}"),
    }
    log::debug!("capture: device released, recording span closed");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
