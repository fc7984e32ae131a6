//! Management-interface actions.
//!
//! Actions arrive as header lists (`Meetme`, `Usernum`, `Message`). Header
//! names match case-insensitively. Arguments are checked in a fixed order so
//! a request missing several headers always reports the same one.

use crate::control::ControlPlane;
use crate::errors::BridgeError;
use common::types::{ConferenceId, UserNo};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerAction {
    MeetmeMute,
    MeetmeUnmute,
    MeetmeWhisper,
}

impl ManagerAction {
    /// Resolve an action name such as `MeetmeMute`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "meetmemute" => Some(ManagerAction::MeetmeMute),
            "meetmeunmute" => Some(ManagerAction::MeetmeUnmute),
            "meetmewhisper" => Some(ManagerAction::MeetmeWhisper),
            _ => None,
        }
    }

    fn success_message(self) -> &'static str {
        match self {
            ManagerAction::MeetmeMute => "User muted",
            ManagerAction::MeetmeUnmute => "User unmuted",
            ManagerAction::MeetmeWhisper => "Whispered user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerResponse {
    Success(&'static str),
    Error(String),
}

impl ManagerResponse {
    /// Wire form: `Response: Success` / `Response: Error` plus a `Message`.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            ManagerResponse::Success(message) => {
                format!("Response: Success\r\nMessage: {message}\r\n\r\n")
            }
            ManagerResponse::Error(message) => {
                format!("Response: Error\r\nMessage: {message}\r\n\r\n")
            }
        }
    }
}

fn header<'h>(headers: &'h [(String, String)], name: &str) -> Option<&'h str> {
    headers
        .iter()
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Run one management action against the control plane.
#[must_use]
pub fn handle(
    control: &ControlPlane,
    action: ManagerAction,
    headers: &[(String, String)],
) -> ManagerResponse {
    match dispatch(control, action, headers) {
        Ok(()) => ManagerResponse::Success(action.success_message()),
        Err(e) => {
            debug!(target: "bridge.manager", ?action, error = %e, "Manager action failed");
            ManagerResponse::Error(e.client_message())
        }
    }
}

fn dispatch(
    control: &ControlPlane,
    action: ManagerAction,
    headers: &[(String, String)],
) -> Result<(), BridgeError> {
    let room = header(headers, "Meetme").ok_or(BridgeError::MissingArgument("conference"))?;
    let user = header(headers, "Usernum").ok_or(BridgeError::MissingArgument("user number"))?;
    let message = match action {
        ManagerAction::MeetmeWhisper => Some(
            header(headers, "Message").ok_or(BridgeError::MissingArgument("whisper message"))?,
        ),
        _ => None,
    };

    let user_no = user
        .parse::<u32>()
        .ok()
        .filter(|n| *n > 0)
        .map(UserNo)
        .ok_or_else(|| BridgeError::InvalidUserNumber(user.to_string()))?;
    // An id that cannot name a room cannot name a live one either
    let room =
        ConferenceId::new(room).map_err(|_| BridgeError::ConferenceNotFound(room.to_string()))?;

    match (action, message) {
        (ManagerAction::MeetmeMute, _) => control.set_muted(&room, user_no, true),
        (ManagerAction::MeetmeUnmute, _) => control.set_muted(&room, user_no, false),
        (ManagerAction::MeetmeWhisper, Some(message)) => control.whisper(&room, user_no, message),
        (ManagerAction::MeetmeWhisper, None) => {
            Err(BridgeError::MissingArgument("whisper message"))
        }
    }
}

/// Parse a `Key: Value` header block, one header per line.
#[must_use]
pub fn parse_headers(block: &str) -> Vec<(String, String)> {
    block
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}
