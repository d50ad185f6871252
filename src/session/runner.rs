//! Session orchestrator: one live conversation over one connection.
//!
//! [`ConversationSession`] owns the [`SharedConversation`] and a driver task
//! that is the only holder of the connection.
//!
//! # Flow
//!
//! ```text
//! open()
//!   └─▶ driver: connect ──ok──▶ Opened  (+ system entry)
//!                       └─err─▶ Failed  [Errored]
//!
//! driver loop (biased select)
//!   ├─ close request   ─▶ Closed, close handshake
//!   ├─ outbound frame  ─▶ sink
//!   └─ inbound frame   ─▶ decode ─▶ transcript / emotion / playback queue
//!        ├─ stream end ─▶ Closed
//!        └─ error      ─▶ Failed  [Errored]
//!
//! start_recording()
//!   └─▶ spawn_blocking(ChunkStream::start) ─▶ uplink task: chunk ─▶ send_audio
//! ```
//!
//! Inbound frames are decoded and applied one at a time on the driver task,
//! so the transcript and emotional state follow arrival order exactly.
//! Outbound frames are polled ahead of inbound ones: the outbound queue is
//! bounded and fed by the uplink, while the inbound stream is bounded only
//! by the peer.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::audio::{AudioChunk, ChunkStream, InputDevice, StopHandle};
use crate::config::{AudioConfig, SessionConfig};
use crate::conversation::{
    new_shared_conversation, with_state, ConversationSnapshot, SharedConversation,
};
use crate::playback::{OutputFactory, PlaybackError, PlaybackEvent, PlaybackQueue};
use crate::protocol::{decode, encode_audio, Frame, Inbound};
use crate::transport::{ConnectionState, Connector, FramedConnection, TransportEvent};

use super::event::{SessionError, SessionEvent};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Apply one transport event and publish what changed. `None` when the
/// event is not a valid transition (e.g. closing twice).
///
/// Publishing happens under the state lock so connection changes reach
/// observers in the order they were applied, whichever task applied them.
fn apply_transport_event(
    state: &SharedConversation,
    events: &broadcast::Sender<SessionEvent>,
    event: TransportEvent,
) -> Option<ConnectionState> {
    with_state(state, |s| {
        let applied = s.apply_transport_event(event)?;
        log::info!("session: connection {}", applied.state);
        let _ = events.send(SessionEvent::ConnectionChanged(applied.state));
        if let Some(notice) = applied.notice {
            let _ = events.send(SessionEvent::TranscriptAppended(notice));
        }
        Some(applied.state)
    })
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// The send side shared by the session and the uplink task.
#[derive(Clone)]
struct Outbound {
    state: SharedConversation,
    frames: mpsc::Sender<Frame>,
    events: broadcast::Sender<SessionEvent>,
}

impl Outbound {
    /// Never blocks. Dropped rather than queued when not open or when the
    /// writer is behind.
    fn send_audio(&self, chunk: AudioChunk) -> Result<(), SessionError> {
        if !with_state(&self.state, |s| s.connection().is_open()) {
            log::debug!("session: dropping {} byte chunk, not connected", chunk.len());
            return Err(SessionError::NotConnected);
        }
        match self.frames.try_send(encode_audio(chunk)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("session: outbound queue full, dropping chunk");
                Err(SessionError::Congested)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::NotConnected),
        }
    }

    fn is_terminal(&self) -> bool {
        with_state(&self.state, |s| s.connection().is_terminal())
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// State owned by the driver task.
struct Driver {
    state: SharedConversation,
    events: broadcast::Sender<SessionEvent>,
    playback: Option<PlaybackQueue>,
}

impl Driver {
    async fn run(
        mut self,
        connector: Arc<dyn Connector>,
        url: String,
        mut close_rx: oneshot::Receiver<()>,
        mut outbound_rx: mpsc::Receiver<Frame>,
    ) {
        let connected = tokio::select! {
            biased;
            _ = &mut close_rx => {
                self.apply(TransportEvent::Closed);
                return;
            }
            result = connector.connect(&url) => result,
        };

        let FramedConnection {
            mut sink,
            mut stream,
        } = match connected {
            Ok(connection) => connection,
            Err(e) => {
                log::error!("session: {e}");
                self.apply(TransportEvent::Failed);
                self.publish(SessionEvent::Error(e.into()));
                return;
            }
        };

        if self.apply(TransportEvent::Opened).is_none() {
            // Closed by the caller while the handshake was completing.
            let _ = sink.close().await;
            return;
        }

        loop {
            tokio::select! {
                biased;
                _ = &mut close_rx => {
                    self.apply(TransportEvent::Closed);
                    break;
                }
                Some(frame) = outbound_rx.recv() => {
                    if let Err(e) = sink.send(frame).await {
                        log::error!("session: {e}");
                        self.apply(TransportEvent::Failed);
                        self.publish(SessionEvent::Error(e.into()));
                        return;
                    }
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(frame)) => self.dispatch(frame),
                    Some(Err(e)) => {
                        log::error!("session: {e}");
                        self.apply(TransportEvent::Failed);
                        self.publish(SessionEvent::Error(e.into()));
                        return;
                    }
                    None => {
                        log::info!("session: closed by remote peer");
                        self.apply(TransportEvent::Closed);
                        return;
                    }
                },
            }
        }

        if let Err(e) = sink.close().await {
            log::debug!("session: close handshake failed: {e}");
        }
        if let Some(playback) = self.playback.as_mut() {
            playback.shutdown();
        }
    }

    fn apply(&self, event: TransportEvent) -> Option<ConnectionState> {
        apply_transport_event(&self.state, &self.events, event)
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Decode one inbound frame and route it. Nothing is applied unless the
    /// connection is open at that instant.
    fn dispatch(&self, frame: Frame) {
        let inbound = match decode(frame) {
            Ok(inbound) => inbound,
            Err(e) => {
                log::warn!("codec: dropping frame: {e}");
                self.publish(SessionEvent::Error(e.into()));
                return;
            }
        };

        match inbound {
            Inbound::Transcription { role, content } => with_state(&self.state, |s| {
                if s.connection().is_open() {
                    let entry = s.apply_transcription(role, content).clone();
                    log::debug!("session: [{}] {}", entry.role, entry.content);
                    self.publish(SessionEvent::TranscriptAppended(entry));
                }
            }),
            Inbound::Emotion(emotion) => with_state(&self.state, |s| {
                if s.connection().is_open() {
                    log::debug!("session: emotional state {emotion}");
                    s.apply_emotion(emotion.clone());
                    self.publish(SessionEvent::EmotionChanged(emotion));
                }
            }),
            Inbound::Audio(chunk) => match &self.playback {
                Some(playback) => match playback.enqueue(chunk) {
                    Ok(()) => {}
                    Err(PlaybackError::Closed) => {
                        log::debug!("playback: queue closed, dropping unit");
                    }
                    Err(e) => {
                        log::warn!("playback: {e}");
                        self.publish(SessionEvent::Error(e.into()));
                    }
                },
                None => log::debug!("playback: disabled, dropping {} byte unit", chunk.len()),
            },
            Inbound::Ignored { kind } => {
                log::debug!("codec: ignoring control message of type {kind:?}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

struct Recording {
    stop: StopHandle,
    uplink: JoinHandle<()>,
}

/// Forward every chunk of one recording span, including the terminal one.
async fn run_uplink(mut chunks: ChunkStream, outbound: Outbound) {
    let mut sent = 0usize;
    let mut dropped = 0usize;

    while let Some(chunk) = chunks.next_chunk().await {
        match outbound.send_audio(chunk) {
            Ok(()) => sent += 1,
            Err(SessionError::NotConnected) => {
                dropped += 1;
                if outbound.is_terminal() {
                    // Release the microphone; the terminal chunk still drains.
                    chunks.stop();
                }
            }
            Err(e) => {
                dropped += 1;
                let _ = outbound.events.send(SessionEvent::Error(e));
            }
        }
    }

    log::info!("capture: recording span finished ({sent} sent, {dropped} dropped)");
}

// ---------------------------------------------------------------------------
// ConversationSession
// ---------------------------------------------------------------------------

/// One conversation's streaming session.
///
/// Starts in `Connecting` as soon as it is created. Must be created inside
/// a tokio runtime.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use voice_session::config::AppConfig;
/// use voice_session::session::ConversationSession;
/// use voice_session::transport::WebSocketConnector;
///
/// # async fn example() {
/// let config = AppConfig::default();
/// let mut session =
///     ConversationSession::open("abc123", &config.session, Arc::new(WebSocketConnector), None);
/// let mut events = session.subscribe();
///
/// while let Ok(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// session.disconnect().await;
/// # }
/// ```
pub struct ConversationSession {
    session_id: String,
    state: SharedConversation,
    outbound: Outbound,
    events: broadcast::Sender<SessionEvent>,
    close_tx: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<()>>,
    recording: Option<Recording>,
    close_timeout: Duration,
}

impl ConversationSession {
    /// Begin connecting to `{endpoint}/conversation/{session_id}`.
    ///
    /// Inbound audio is played through `playback` when given; otherwise it
    /// is dropped.
    pub fn open(
        session_id: impl Into<String>,
        config: &SessionConfig,
        connector: Arc<dyn Connector>,
        playback: Option<OutputFactory>,
    ) -> Self {
        let session_id = session_id.into();
        let state = new_shared_conversation(session_id.clone());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (frames_tx, frames_rx) = mpsc::channel(config.outbound_queue.max(1));
        let (close_tx, close_rx) = oneshot::channel();

        let playback = playback.and_then(|factory| {
            let events = events.clone();
            let listener = move |event: PlaybackEvent| {
                if let PlaybackEvent::Failed { error, .. } = event {
                    let _ = events.send(SessionEvent::Error(error.into()));
                }
            };
            PlaybackQueue::start(factory, config.playback_queue, listener)
                .map_err(|e| log::warn!("playback: {e}; agent audio will not be played"))
                .ok()
        });

        let driver = Driver {
            state: Arc::clone(&state),
            events: events.clone(),
            playback,
        };
        let url = config.conversation_url(&session_id);
        let driver = tokio::spawn(driver.run(connector, url, close_rx, frames_rx));

        Self {
            outbound: Outbound {
                state: Arc::clone(&state),
                frames: frames_tx,
                events: events.clone(),
            },
            session_id,
            state,
            events,
            close_tx: Some(close_tx),
            driver: Some(driver),
            recording: None,
            close_timeout: config.close_timeout(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        with_state(&self.state, |s| s.connection())
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        with_state(&self.state, |s| s.snapshot())
    }

    /// Events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn shared_state(&self) -> &SharedConversation {
        &self.state
    }

    /// Send one audio chunk. Fails with `NotConnected` unless the
    /// connection is open; never blocks.
    pub fn send_audio(&self, chunk: AudioChunk) -> Result<(), SessionError> {
        self.outbound.send_audio(chunk)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Open `device` and stream its chunks until
    /// [`stop_recording`](Self::stop_recording). A no-op while already
    /// recording.
    pub async fn start_recording<D: InputDevice>(
        &mut self,
        device: D,
        config: &AudioConfig,
    ) -> Result<(), SessionError> {
        if self.recording.is_some() {
            return Ok(());
        }
        if !self.connection_state().is_open() {
            return Err(SessionError::NotConnected);
        }

        let audio = config.clone();
        let chunks = tokio::task::spawn_blocking(move || ChunkStream::start(device, &audio))
            .await
            .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?
            .map_err(|e| {
                log::warn!("capture: {e}");
                SessionError::DeviceUnavailable(e.to_string())
            })?;

        log::info!("capture: recording");
        let stop = chunks.stop_handle();
        let uplink = tokio::spawn(run_uplink(chunks, self.outbound.clone()));
        self.recording = Some(Recording { stop, uplink });
        Ok(())
    }

    /// Stop capture, release the device and wait for the terminal chunk to
    /// be sent.
    pub async fn stop_recording(&mut self) {
        if let Some(recording) = self.recording.take() {
            recording.stop.stop();
            if let Err(e) = recording.uplink.await {
                log::warn!("capture: uplink task failed: {e}");
            }
        }
    }

    /// Stop recording and close the connection. Idempotent; the transcript
    /// and emotional state are left as last observed.
    pub async fn disconnect(&mut self) {
        self.stop_recording().await;
        apply_transport_event(&self.state, &self.events, TransportEvent::Closed);

        if let Some(close) = self.close_tx.take() {
            let _ = close.send(());
        }
        if let Some(mut driver) = self.driver.take() {
            match tokio::time::timeout(self.close_timeout, &mut driver).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("session: driver task failed: {e}"),
                Err(_) => {
                    log::warn!("session: close handshake timed out");
                    driver.abort();
                }
            }
        }
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        if let Some(recording) = &self.recording {
            recording.stop.stop();
        }
        if let Some(close) = self.close_tx.take() {
            let _ = close.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
