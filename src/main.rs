//! Application entry point: terminal voice session client.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (defaults on first run), then apply
//!    environment overrides.
//! 3. Create [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Fetch the conversation's context once and print it.
//! 5. Open the [`ConversationSession`] with playback if enabled.
//! 6. Print session events as they arrive; read commands from stdin until
//!    `q`, EOF or Ctrl-C, then disconnect.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use voice_session::{
    audio::CpalMicrophone,
    config::{AppConfig, AudioConfig},
    context::{ConversationLookup, ConversationSummary, HttpConversationLookup},
    playback::RodioOutput,
    session::{ConversationSession, SessionEvent},
    transport::WebSocketConnector,
};

const USAGE: &str = "usage: voice-session <conversation-id>";

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_summary(summary: &ConversationSummary) {
    println!("conversation {} ({})", summary.id, summary.status);
    println!("  strategy: {}", summary.strategy);
    if let Some(amount) = summary.offered_amount {
        println!("  offered:  ${amount:.2}");
    }
    if let Some(amount) = summary.accepted_amount {
        println!("  accepted: ${amount:.2}");
    }
    if let Some(result) = &summary.negotiation_result {
        println!("  result:   {result}");
    }
    if let Some(seconds) = summary.duration_seconds {
        println!("  duration: {seconds:.0}s");
    }
    if let Some(emotion) = &summary.emotional_state_detected {
        println!("  last detected emotion: {emotion}");
    }
}

async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::TranscriptAppended(entry)) => println!(
                "[{}] {}: {}",
                entry.received_at.format("%H:%M:%S"),
                entry.role,
                entry.content
            ),
            Ok(SessionEvent::EmotionChanged(emotion)) => {
                let look = emotion.presentation();
                println!("emotion: {emotion} [{}] {}", look.color, look.description);
            }
            Ok(SessionEvent::ConnectionChanged(state)) => {
                let shown = if state.is_open() { "connected" } else { "disconnected" };
                println!("connection: {shown} ({state})");
            }
            Ok(SessionEvent::Error(e)) => eprintln!("warning: {e}"),
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("session: event printer lagged, {skipped} events skipped")
            }
            Err(RecvError::Closed) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn toggle_recording(session: &mut ConversationSession, audio: &AudioConfig) {
    if session.is_recording() {
        session.stop_recording().await;
        println!("recording stopped");
        return;
    }
    match session
        .start_recording(CpalMicrophone::from_config(audio), audio)
        .await
    {
        Ok(()) => println!("recording (r + Enter to stop)"),
        Err(e) => println!("cannot record: {e}"),
    }
}

async fn run(session_id: String, config: AppConfig) -> anyhow::Result<()> {
    let lookup = HttpConversationLookup::from_config(&config.api);
    match lookup.fetch(&session_id).await {
        Ok(summary) => print_summary(&summary),
        Err(e) => log::warn!("context: {e}"),
    }

    let playback = config
        .playback
        .enabled
        .then(|| RodioOutput::factory(config.playback.volume));
    let mut session = ConversationSession::open(
        session_id.as_str(),
        &config.session,
        Arc::new(WebSocketConnector),
        playback,
    );
    let printer = tokio::spawn(print_events(session.subscribe()));

    println!("r + Enter: toggle recording, q + Enter: quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line.context("failed to read stdin")? {
                None => break,
                Some(line) => match line.trim() {
                    "q" => break,
                    "r" => toggle_recording(&mut session, &config.audio).await,
                    "" => {}
                    other => println!("unknown command {other:?}"),
                },
            },
        }
    }

    session.disconnect().await;
    printer.abort();

    let snapshot = session.snapshot();
    println!(
        "session {} {}: {} transcript entries, emotion {}",
        snapshot.session_id,
        snapshot.connection,
        snapshot.transcript.len(),
        snapshot.emotion
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let session_id = std::env::args().nth(1).context(USAGE)?;
    log::info!("voice-session starting for conversation {session_id}");

    // 2. Configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    config.apply_env_overrides();

    // 3. Tokio runtime (2 workers: session driver + uplink)
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let result = rt.block_on(run(session_id, config));
    // The stdin reader may still be parked on a blocking thread.
    rt.shutdown_background();
    result
}
