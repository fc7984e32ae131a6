//! Identifier types for conference rooms and their participants.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest room identifier accepted from callers or configuration.
pub const MAX_CONFERENCE_ID_LEN: usize = 79;

/// Errors raised when validating a room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConferenceIdError {
    /// Identifier was empty after trimming.
    #[error("conference id is empty")]
    Empty,

    /// Identifier exceeded [`MAX_CONFERENCE_ID_LEN`].
    #[error("conference id longer than {MAX_CONFERENCE_ID_LEN} characters")]
    TooLong,
}

/// Room number of a conference.
///
/// Usually numeric (`"600"`), but any printable string is allowed. Only
/// numeric ids inside the configured room-id space occupy a slot in the
/// registry's in-use map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConferenceId(String);

impl ConferenceId {
    /// Validate and wrap a room identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConferenceIdError`] when the trimmed id is empty or too long.
    pub fn new(id: impl AsRef<str>) -> Result<Self, ConferenceIdError> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(ConferenceIdError::Empty);
        }
        if id.len() > MAX_CONFERENCE_ID_LEN {
            return Err(ConferenceIdError::TooLong);
        }
        Ok(Self(id.to_string()))
    }

    /// Room id for a slot picked from the in-use map.
    #[must_use]
    pub fn from_slot(slot: usize) -> Self {
        Self(slot.to_string())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Slot index in a room-id space of `space` entries.
    ///
    /// `None` for non-numeric ids and for numbers outside `0..space`; such
    /// rooms are never tracked in the in-use map.
    #[must_use]
    pub fn slot(&self, space: usize) -> Option<usize> {
        if !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.0.parse::<usize>().ok().filter(|n| *n < space)
    }
}

impl fmt::Display for ConferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ConferenceId {
    type Error = ConferenceIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConferenceId> for String {
    fn from(id: ConferenceId) -> Self {
        id.0
    }
}

/// Participant number inside one conference, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserNo(pub u32);

impl UserNo {
    /// Number given to the first participant of an empty room.
    pub const FIRST: UserNo = UserNo(1);

    /// The number following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for UserNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
