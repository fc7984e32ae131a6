//! Bridge configuration.
//!
//! Two layers: process settings from environment variables ([`Config`]) and
//! the static room definitions in the rooms file ([`RoomsFile`]). Room PINs
//! are held as [`SecretString`] and print redacted.

use crate::actors::recorder::RecordingFormat;
use common::secret::SecretString;
use common::types::ConferenceId;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default rooms file path.
pub const DEFAULT_ROOMS_FILE: &str = "meetme.toml";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8082";

/// Default session poll tick in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;

/// Default number of auto-numbered room slots.
pub const DEFAULT_ROOM_ID_SPACE: usize = crate::registry::DEFAULT_ROOM_ID_SPACE;

/// Default PIN entry attempts before the caller is turned away.
pub const DEFAULT_PIN_ATTEMPTS: u32 = 3;

/// Default room-number prompts before the caller is turned away.
pub const DEFAULT_ROOM_PROMPT_ATTEMPTS: u32 = 3;

/// Default directory for recordings without an explicit file.
pub const DEFAULT_RECORDING_DIR: &str = ".";

/// Default time allowed for sessions to drain on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;

/// Mixer port buffering limits, in frames.
pub const MIN_AUDIO_BUFFERS: u32 = 2;
pub const MAX_AUDIO_BUFFERS: u32 = 32;
pub const DEFAULT_AUDIO_BUFFERS: u32 = 32;

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the rooms file (default: "meetme.toml").
    pub rooms_file: PathBuf,

    /// Health and metrics bind address (default: "0.0.0.0:8082").
    pub health_bind_address: String,

    /// Session poll tick (default: 20ms).
    pub poll_interval: Duration,

    /// Size of the auto-numbered room space (default: 1024).
    pub room_id_space: usize,

    /// PIN entry attempts (default: 3).
    pub pin_attempts: u32,

    /// Room number prompts (default: 3).
    pub room_prompt_attempts: u32,

    /// Directory for default recording files (default: ".").
    pub recording_dir: PathBuf,

    /// Format for recordings that do not name one (default: wav).
    pub recording_format: RecordingFormat,

    /// Drain budget on shutdown (default: 30s).
    pub shutdown_timeout: Duration,

    /// Emit JSON logs.
    pub log_json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rooms file: {0}")]
    Parse(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let rooms_file = vars
            .get("BRIDGE_ROOMS_FILE")
            .map_or_else(|| PathBuf::from(DEFAULT_ROOMS_FILE), PathBuf::from);

        let health_bind_address = vars
            .get("BRIDGE_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let poll_interval_ms = vars
            .get("BRIDGE_POLL_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "BRIDGE_POLL_INTERVAL_MS must be positive".to_string(),
            ));
        }

        let room_id_space = vars
            .get("BRIDGE_ROOM_ID_SPACE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_ROOM_ID_SPACE);
        if room_id_space == 0 {
            return Err(ConfigError::InvalidValue(
                "BRIDGE_ROOM_ID_SPACE must be positive".to_string(),
            ));
        }

        let pin_attempts = vars
            .get("BRIDGE_PIN_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PIN_ATTEMPTS)
            .max(1);

        let room_prompt_attempts = vars
            .get("BRIDGE_ROOM_PROMPT_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_ROOM_PROMPT_ATTEMPTS)
            .max(1);

        let recording_dir = vars
            .get("BRIDGE_RECORDING_DIR")
            .map_or_else(|| PathBuf::from(DEFAULT_RECORDING_DIR), PathBuf::from);

        let recording_format = vars
            .get("BRIDGE_RECORDING_FORMAT")
            .map_or_else(RecordingFormat::default, |s| RecordingFormat::from_name(s));

        let shutdown_timeout = Duration::from_secs(
            vars.get("BRIDGE_SHUTDOWN_TIMEOUT_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECONDS),
        );

        let log_json = vars
            .get("BRIDGE_LOG_JSON")
            .is_some_and(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"));

        Ok(Config {
            rooms_file,
            health_bind_address,
            poll_interval: Duration::from_millis(poll_interval_ms),
            room_id_space,
            pin_attempts,
            room_prompt_attempts,
            recording_dir,
            recording_format,
            shutdown_timeout,
            log_json,
        })
    }
}

/// A room defined in the rooms file.
#[derive(Clone)]
pub struct StaticRoom {
    pub id: ConferenceId,
    pub pin: Option<SecretString>,
    pub admin_pin: Option<SecretString>,
}

impl fmt::Debug for StaticRoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticRoom")
            .field("id", &self.id)
            .field("pin", &self.pin.as_ref().map(|_| "[REDACTED]"))
            .field("admin_pin", &self.admin_pin.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl StaticRoom {
    /// Parse one `conf` entry: `number[,pin[,admin_pin]]`, `|` also
    /// accepted as separator. Empty PIN fields mean no PIN.
    fn parse(entry: &str) -> Option<Self> {
        let mut fields = entry.split([',', '|']).map(str::trim);
        let id = ConferenceId::new(fields.next()?).ok()?;
        let secret = |field: Option<&str>| {
            field
                .filter(|s| !s.is_empty())
                .map(|s| SecretString::from(s.to_string()))
        };
        let pin = secret(fields.next());
        let admin_pin = secret(fields.next());
        Some(Self { id, pin, admin_pin })
    }
}

/// Static room definitions and mixer tuning.
#[derive(Debug, Clone)]
pub struct RoomsFile {
    audio_buffers: u32,
    rooms: Vec<StaticRoom>,
}

impl Default for RoomsFile {
    fn default() -> Self {
        Self {
            audio_buffers: DEFAULT_AUDIO_BUFFERS,
            rooms: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawRoomsFile {
    #[serde(default)]
    general: RawGeneral,
    #[serde(default)]
    rooms: RawRooms,
}

#[derive(Debug, Default, Deserialize)]
struct RawGeneral {
    audiobuffers: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRooms {
    #[serde(default)]
    conf: Vec<String>,
}

impl RoomsFile {
    /// Parse the TOML rooms file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] when the text is not valid TOML of the
    /// expected shape. Individual bad `conf` entries are skipped with a
    /// warning.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let raw: RawRoomsFile =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let audio_buffers = match raw.general.audiobuffers {
            None => DEFAULT_AUDIO_BUFFERS,
            Some(n) => match u32::try_from(n) {
                Ok(n) if (MIN_AUDIO_BUFFERS..=MAX_AUDIO_BUFFERS).contains(&n) => n,
                _ => {
                    warn!(
                        target: "bridge.config",
                        audiobuffers = n,
                        min = MIN_AUDIO_BUFFERS,
                        max = MAX_AUDIO_BUFFERS,
                        "audiobuffers out of range, using default"
                    );
                    DEFAULT_AUDIO_BUFFERS
                }
            },
        };

        let mut rooms = Vec::with_capacity(raw.rooms.conf.len());
        for entry in &raw.rooms.conf {
            match StaticRoom::parse(entry) {
                Some(room) => rooms.push(room),
                None => warn!(target: "bridge.config", "Skipping invalid conf entry"),
            }
        }

        Ok(Self {
            audio_buffers,
            rooms,
        })
    }

    /// Read and parse the rooms file at `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when the file cannot be read, otherwise as
    /// [`RoomsFile::parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    #[must_use]
    pub fn audio_buffers(&self) -> u32 {
        self.audio_buffers
    }

    #[must_use]
    pub fn rooms(&self) -> &[StaticRoom] {
        &self.rooms
    }

    /// The first definition for `id`.
    #[must_use]
    pub fn find(&self, id: &ConferenceId) -> Option<&StaticRoom> {
        self.rooms.iter().find(|room| &room.id == id)
    }
}
