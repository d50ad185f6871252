//! Serialised playback queue.
//!
//! Inbound audio units are handed to a dedicated `audio-playback` thread
//! that plays them one at a time, in arrival order. A unit starts only after
//! the previous one has finished or failed; a failure is reported and the
//! next unit is still attempted. At most `depth` units wait behind the one
//! playing; beyond that new units are dropped with
//! [`PlaybackError::Overflow`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use crate::audio::AudioChunk;
use crate::playback::output::{AudioOutput, OutputFactory, PlaybackError};

// ---------------------------------------------------------------------------
// PlaybackEvent
// ---------------------------------------------------------------------------

/// Progress of queued units, numbered from 0 in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started { unit: u64 },
    Finished { unit: u64 },
    Failed { unit: u64, error: PlaybackError },
}

// ---------------------------------------------------------------------------
// PlaybackQueue
// ---------------------------------------------------------------------------

/// Handle to the playback thread. Dropping it discards units that have not
/// started yet.
pub struct PlaybackQueue {
    tx: Option<mpsc::SyncSender<AudioChunk>>,
    depth: usize,
    cancelled: Arc<AtomicBool>,
}

impl PlaybackQueue {
    /// Spawn the playback thread with room for `depth` waiting units.
    /// `listener` is called on that thread for every [`PlaybackEvent`].
    pub fn start<L>(
        open_output: OutputFactory,
        depth: usize,
        listener: L,
    ) -> Result<Self, PlaybackError>
    where
        L: Fn(PlaybackEvent) + Send + 'static,
    {
        let depth = depth.max(1);
        let (tx, rx) = mpsc::sync_channel::<AudioChunk>(depth);
        let cancelled = Arc::new(AtomicBool::new(false));
        let worker_cancelled = Arc::clone(&cancelled);

        std::thread::Builder::new()
            .name("audio-playback".into())
            .spawn(move || run_playback(rx, open_output, listener, worker_cancelled))
            .map_err(|e| PlaybackError::Worker(e.to_string()))?;

        Ok(Self {
            tx: Some(tx),
            depth,
            cancelled,
        })
    }

    /// Queue one unit behind any already waiting. Never blocks: a full
    /// queue drops the unit with [`PlaybackError::Overflow`], and after
    /// [`shutdown`](Self::shutdown) every unit is refused with
    /// [`PlaybackError::Closed`].
    pub fn enqueue(&self, unit: AudioChunk) -> Result<(), PlaybackError> {
        let tx = self.tx.as_ref().ok_or(PlaybackError::Closed)?;
        tx.try_send(unit).map_err(|e| match e {
            mpsc::TrySendError::Full(_) => PlaybackError::Overflow(self.depth),
            mpsc::TrySendError::Disconnected(_) => PlaybackError::Closed,
        })
    }

    /// Stop accepting units and drop those not yet started. The unit
    /// currently playing runs to its end.
    pub fn shutdown(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.tx.take();
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_playback<L>(
    rx: mpsc::Receiver<AudioChunk>,
    open_output: OutputFactory,
    listener: L,
    cancelled: Arc<AtomicBool>,
) where
    L: Fn(PlaybackEvent),
{
    let mut output: Option<Box<dyn AudioOutput>> = None;

    for (unit, chunk) in (0u64..).zip(rx.iter()) {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        if output.is_none() {
            match open_output() {
                Ok(opened) => output = Some(opened),
                Err(error) => {
                    log::warn!("playback: unit {unit} skipped: {error}");
                    listener(PlaybackEvent::Failed { unit, error });
                    continue;
                }
            }
        }
        let Some(out) = output.as_mut() else {
            continue;
        };

        listener(PlaybackEvent::Started { unit });
        match out.play(chunk.as_bytes()) {
            Ok(()) => listener(PlaybackEvent::Finished { unit }),
            Err(error) => {
                log::warn!("playback: unit {unit} failed: {error}");
                listener(PlaybackEvent::Failed { unit, error });
            }
        }
    }

    log::debug!("playback: queue closed");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
