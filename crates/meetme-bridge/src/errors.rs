//! Bridge error types.
//!
//! Every error maps to a stable numeric code and a caller-safe message.
//! Internal details (driver errno text, file paths) are logged server-side
//! but never returned to admin or manager callers.

use crate::channel::ChannelError;
use crate::mixer::MixerError;
use thiserror::Error;

/// Bridge error type.
///
/// Error codes:
/// - `MissingArgument`, `InvalidUserNumber`, `InvalidRoomNumber`: `BAD_REQUEST` (1)
/// - `PinRejected`: `UNAUTHORIZED` (2)
/// - `RoomLocked`: `FORBIDDEN` (3)
/// - `ConferenceNotFound`: `NOT_FOUND` (4)
/// - `UserNotFound`: `USER_NOT_FOUND` (5)
/// - `Mixer`, `Channel`, `Recording`, `Config`, `Internal`: `INTERNAL_ERROR` (6)
/// - `RoomUnavailable`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No active conference with this room number.
    #[error("Conference not found: {0}")]
    ConferenceNotFound(String),

    /// Conference exists but has no participant with this number.
    #[error("User {user_no} not found in conference {conference_id}")]
    UserNotFound {
        conference_id: String,
        user_no: String,
    },

    /// A required argument was not supplied.
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    /// User number was not a positive integer.
    #[error("Invalid user number: {0}")]
    InvalidUserNumber(String),

    /// Room number entered by the caller is not usable.
    #[error("Invalid room number: {0}")]
    InvalidRoomNumber(String),

    /// Room is locked and the caller lacks the admin bit.
    #[error("Conference is locked: {0}")]
    RoomLocked(String),

    /// PIN retries exhausted.
    #[error("PIN rejected for conference {0}")]
    PinRejected(String),

    /// No free room could be found or created.
    #[error("No room available: {0}")]
    RoomUnavailable(String),

    /// Mixing resource failure, fatal to one participant session.
    #[error("Mixer error: {0}")]
    Mixer(#[from] MixerError),

    /// Channel failure, fatal to one participant session.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Recording sidecar failure.
    #[error("Recording error: {0}")]
    Recording(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Returns the numeric error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            BridgeError::MissingArgument(_)
            | BridgeError::InvalidUserNumber(_)
            | BridgeError::InvalidRoomNumber(_) => 1, // BAD_REQUEST
            BridgeError::PinRejected(_) => 2,        // UNAUTHORIZED
            BridgeError::RoomLocked(_) => 3,         // FORBIDDEN
            BridgeError::ConferenceNotFound(_) => 4, // NOT_FOUND
            BridgeError::UserNotFound { .. } => 5,   // USER_NOT_FOUND
            BridgeError::Mixer(_)
            | BridgeError::Channel(_)
            | BridgeError::Recording(_)
            | BridgeError::Config(_)
            | BridgeError::Internal(_) => 6, // INTERNAL_ERROR
            BridgeError::RoomUnavailable(_) => 7, // CAPACITY_EXCEEDED
        }
    }

    /// Returns a caller-safe message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            BridgeError::ConferenceNotFound(_) => "Meetme conference does not exist".to_string(),
            BridgeError::UserNotFound { .. } => "User number not found".to_string(),
            BridgeError::MissingArgument(what) => format!("Meetme {what} not specified"),
            BridgeError::InvalidUserNumber(_) => "Invalid user number".to_string(),
            BridgeError::InvalidRoomNumber(_) => "Invalid conference number".to_string(),
            BridgeError::RoomLocked(_) => "Conference is locked".to_string(),
            BridgeError::PinRejected(_) => "Invalid PIN".to_string(),
            BridgeError::RoomUnavailable(_) => "No empty conference available".to_string(),
            BridgeError::Mixer(_)
            | BridgeError::Channel(_)
            | BridgeError::Recording(_)
            | BridgeError::Config(_)
            | BridgeError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Metric label for the admission outcome this error represents.
    #[must_use]
    pub fn outcome_label(&self) -> &'static str {
        match self {
            BridgeError::RoomLocked(_) => "locked",
            BridgeError::PinRejected(_) => "bad_pin",
            BridgeError::InvalidRoomNumber(_) => "invalid_room",
            BridgeError::RoomUnavailable(_) => "no_room",
            BridgeError::ConferenceNotFound(_) => "not_found",
            BridgeError::Mixer(_) => "mixer_error",
            BridgeError::Channel(_) => "channel_error",
            _ => "error",
        }
    }
}
