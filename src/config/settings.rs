//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every section is `#[serde(default)]`, so a partial `settings.toml` only
//! overrides the keys it names.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

/// Overrides [`SessionConfig::endpoint`] when set.
pub const WS_URL_ENV: &str = "VOICE_SESSION_WS_URL";
/// Overrides [`ApiConfig::base_url`] when set.
pub const API_URL_ENV: &str = "VOICE_SESSION_API_URL";

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Settings for the streaming connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the streaming channel. The per-conversation address is
    /// `{endpoint}/conversation/{session_id}`.
    pub endpoint: String,
    /// Outbound frames that may wait for the writer before new audio is
    /// dropped.
    pub outbound_queue: usize,
    /// Inbound audio units that may wait for the speaker. A unit arriving
    /// at a full queue is dropped and reported.
    pub playback_queue: usize,
    /// Buffered [`crate::session::SessionEvent`]s per observer before the
    /// observer starts lagging.
    pub event_capacity: usize,
    /// How long `disconnect` waits for the close handshake.
    pub close_timeout_ms: u64,
}

impl SessionConfig {
    /// Address of the streaming channel for one conversation. The id is
    /// percent-encoded as a single path segment.
    ///
    /// ```
    /// use voice_session::config::SessionConfig;
    ///
    /// let cfg = SessionConfig::default();
    /// assert_eq!(
    ///     cfg.conversation_url("abc123"),
    ///     "ws://localhost:8000/api/v1/ws/conversation/abc123"
    /// );
    /// assert_eq!(
    ///     cfg.conversation_url("a b"),
    ///     "ws://localhost:8000/api/v1/ws/conversation/a%20b"
    /// );
    /// ```
    pub fn conversation_url(&self, session_id: &str) -> String {
        format!(
            "{}/conversation/{}",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(session_id)
        )
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8000/api/v1/ws".into(),
            outbound_queue: 32,
            playback_queue: 16,
            event_capacity: 64,
            close_timeout_ms: 2_000,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Payload format of outbound audio chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkEncoding {
    /// 20 ms Opus packets, each prefixed with its big-endian `u16` length.
    #[default]
    Opus,
    /// One self-contained 16-bit mono PCM WAV file per chunk.
    Wav,
}

/// Settings for microphone capture and chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of the encoded outbound chunks in Hz.
    pub sample_rate: u32,
    /// Wall-clock interval between chunk flushes in milliseconds.
    pub chunk_interval_ms: u64,
    /// Payload format of each chunk.
    pub encoding: ChunkEncoding,
    /// Request platform echo cancellation on the input stream.
    pub echo_cancellation: bool,
    /// Request platform noise suppression on the input stream.
    pub noise_suppression: bool,
    /// Input device name; `None` means the system default.
    pub input_device: Option<String>,
}

impl AudioConfig {
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_interval_ms: 250,
            encoding: ChunkEncoding::Opus,
            echo_cancellation: true,
            noise_suppression: true,
            input_device: None,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Settings for agent speech playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Play inbound agent audio. When `false` binary frames are discarded.
    pub enabled: bool,
    /// Output gain, `1.0` is unchanged.
    pub volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// ApiConfig
// ---------------------------------------------------------------------------

/// Settings for the REST API consulted once at startup for conversation
/// context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL, e.g. `http://localhost:8000/api/v1`.
    pub base_url: String,
    /// Maximum seconds to wait for a response.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".into(),
            timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_session::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Streaming connection settings.
    pub session: SessionConfig,
    /// Microphone capture settings.
    pub audio: AudioConfig,
    /// Agent audio playback settings.
    pub playback: PlaybackConfig,
    /// Conversation lookup API settings.
    pub api: ApiConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply [`WS_URL_ENV`] / [`API_URL_ENV`] from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(WS_URL_ENV).filter(|s| !s.is_empty()) {
            self.session.endpoint = url;
        }
        if let Some(url) = lookup(API_URL_ENV).filter(|s| !s.is_empty()) {
            self.api.base_url = url;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
